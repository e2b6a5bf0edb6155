//! Order submission and order-item lookups.

use anyhow::{Result, bail};
use chrono::{Local, Months, NaiveDateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::client::{Client, RemoteFile};
use crate::dates::RAPI_FORMAT;
use crate::error::{RapiError, is_fatal};
use crate::results::{Record, field_value};
use crate::util::{anchor_url, de_id, value_to_string};

/// Statuses after which an order item will never become downloadable.
pub const FAILED_STATUSES: &[&str] = &[
    "CANCELLED",
    "FAILED",
    "EXPIRED",
    "DELIVERED",
    "MEDIA_ORDER_SUBMITTED",
    "AWAITING_PAYMENT",
];

pub const AVAILABLE_FOR_DOWNLOAD: &str = "AVAILABLE_FOR_DOWNLOAD";

const ORDER_BATCH: usize = 100;

/// One image within an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    #[serde(deserialize_with = "de_id")]
    pub item_id: String,
    #[serde(deserialize_with = "de_id")]
    pub order_id: String,
    #[serde(deserialize_with = "de_id")]
    pub record_id: String,
    #[serde(default)]
    pub collection_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_submitted: Option<String>,
    /// Local time the order was submitted by this client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_rapi_ordered: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub destinations: Vec<ItemDestination>,
    /// Remote path to size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Record>,
    #[serde(flatten)]
    pub extra: Record,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDestination {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// HTML anchor around the download URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(flatten)]
    pub extra: Record,
}

impl OrderItem {
    /// An order parameter by name (`ParentItemId`, `Vap_Request_UUID`, ...).
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        match &self.parameters {
            Some(Value::Object(map)) => map.get(name),
            Some(Value::Array(items)) => items.iter().find_map(|p| p.get(name)),
            _ => None,
        }
    }

    /// Value-added product (e.g. SAR Toolbox) items.
    pub fn is_vap(&self) -> bool {
        self.parameter("Vap_Request_UUID").is_some() || self.extra.contains_key("Vap_Request_UUID")
    }

    pub fn is_failed(&self) -> bool {
        FAILED_STATUSES.contains(&self.status.as_str())
    }

    pub fn is_available(&self) -> bool {
        self.status == AVAILABLE_FOR_DOWNLOAD
    }

    /// Download URLs of this item's destinations, sized from the manifest.
    pub fn remote_files(&self) -> Vec<RemoteFile> {
        let size = self
            .manifest
            .as_ref()
            .and_then(|m| m.values().last())
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
            .unwrap_or(0);

        self.destinations
            .iter()
            .filter_map(|d| d.string_value.as_deref().and_then(anchor_url))
            .map(|location| RemoteFile {
                location,
                content_length: size,
                content_type: None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
            Priority::Urgent => "Urgent",
        })
    }
}

impl std::str::FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => bail!("unknown priority '{}' (expected Low, Medium, High or Urgent)", other),
        }
    }
}

/// Options shared by every item of an order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderOptions {
    pub priority: Priority,
    /// `[{"packagingFormat": "TARGZ"}, ...]`
    pub parameters: Vec<Value>,
    /// Order destinations, see [`crate::Destination::to_json`].
    pub destinations: Vec<Value>,
}

/// Filters for [`Client::get_orders`].
#[derive(Debug, Clone, PartialEq)]
pub struct OrderQuery {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub max_orders: usize,
    pub status: Option<String>,
}

impl Default for OrderQuery {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            max_orders: 100,
            status: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ItemsResponse {
    #[serde(default)]
    items: Vec<OrderItem>,
}

/// Builds the order item request for each record.
pub(crate) fn order_items(records: &[Record], opts: &OrderOptions) -> Result<Vec<Value>> {
    let mut items = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        let collection_id = required(record, index, "collectionId")?;
        let record_id = required(record, index, "recordId")?;

        let mut item = json!({ "collectionId": collection_id, "recordId": record_id });

        let priority = match field_value(record, "priority").and_then(Value::as_str) {
            Some(p) => Some(p.parse::<Priority>().map_or_else(|_| title_case(p), |p| p.to_string())),
            None if opts.priority != Priority::Medium => Some(opts.priority.to_string()),
            None => None,
        };
        if let Some(p) = priority {
            item["priority"] = Value::String(p);
        }

        let mut parameters: Option<Vec<Value>> = match field_value(record, "parameters") {
            Some(Value::Array(p)) => Some(p.clone()),
            Some(Value::Object(p)) => Some(
                p.iter()
                    .map(|(k, v)| Value::Object(Record::from_iter([(k.clone(), v.clone())])))
                    .collect(),
            ),
            _ if !opts.parameters.is_empty() => Some(opts.parameters.clone()),
            _ => None,
        };
        if collection_id == "NAPL" {
            let params = parameters.get_or_insert_with(Vec::new);
            params.push(json!({ "MediaType": "DIGITAL" }));
            params.push(json!({ "FreeMode": "true" }));
        }
        if let Some(params) = parameters {
            item["parameters"] = Value::Array(params);
        }

        items.push(item);
    }
    Ok(items)
}

fn required(record: &Record, index: usize, key: &str) -> Result<String> {
    match field_value(record, key) {
        Some(v) if !v.is_null() => Ok(value_to_string(v)),
        _ => Err(RapiError::MissingKey {
            index,
            key: key.to_string(),
        }
        .into()),
    }
}

fn title_case(s: &str) -> String {
    let mut chars = s.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Drops repeated item ids and keeps the first item per record, except
/// value-added product items which are all kept.
pub fn remove_duplicate_orders(items: &[OrderItem]) -> Vec<OrderItem> {
    let mut unique: Vec<OrderItem> = Vec::new();
    let mut item_ids = HashSet::new();
    let mut record_ids = HashSet::new();

    for item in items {
        if item_ids.contains(&item.item_id) {
            continue;
        }
        if item.is_vap() {
            item_ids.insert(item.item_id.clone());
            unique.push(item.clone());
            continue;
        }
        if record_ids.contains(&item.record_id) {
            continue;
        }
        item_ids.insert(item.item_id.clone());
        record_ids.insert(item.record_id.clone());
        unique.push(item.clone());
    }
    unique
}

/// The item with `item_id`, or the item whose `ParentItemId` is `item_id`.
pub fn find_item_in_orders<'a>(item_id: &str, orders: &'a [OrderItem]) -> Option<&'a OrderItem> {
    orders.iter().find(|o| o.item_id == item_id).or_else(|| {
        orders.iter().find(|o| {
            o.parameter("ParentItemId")
                .is_some_and(|p| value_to_string(p) == item_id)
        })
    })
}

fn stamp(items: &mut [OrderItem], submitted: &str) {
    for item in items {
        item.date_rapi_ordered = Some(submitted.to_string());
    }
}

impl Client {
    /// Orders every record (each needs `collectionId` and `recordId` under
    /// any field convention). Items are posted in batches of 100.
    pub fn order(&self, records: &[Record], opts: &OrderOptions) -> Result<Vec<OrderItem>> {
        info!(count = records.len(), "Submitting order items...");
        let items = order_items(records, opts)?;
        let url = self.url(&["order"], &[])?;
        let submitted = Local::now().to_rfc3339();

        let mut all = Vec::with_capacity(items.len());
        for batch in items.chunks(ORDER_BATCH) {
            let body = json!({ "destinations": opts.destinations, "items": batch });
            let res: ItemsResponse =
                self.api_json(Method::POST, &url, Some(&body), self.order_timeout())?;
            let mut got = res.items;
            stamp(&mut got, &submitted);
            all.extend(got);
        }

        info!(count = all.len(), "Order submitted successfully");
        Ok(all)
    }

    /// Posts a prepared order request (`{"destinations": [...], "items": [...]}`),
    /// optionally overriding every item's priority.
    pub fn order_json(&self, mut request: Value, priority: Option<Priority>) -> Result<Vec<OrderItem>> {
        info!("Submitting order items...");
        if let Some(p) = priority {
            if let Some(items) = request.get_mut("items").and_then(Value::as_array_mut) {
                for item in items {
                    item["priority"] = Value::String(p.to_string());
                }
            }
        }

        let url = self.url(&["order"], &[])?;
        let submitted = Local::now().to_rfc3339();
        let res: ItemsResponse = self.api_json(Method::POST, &url, Some(&request), self.order_timeout())?;
        let mut items = res.items;
        stamp(&mut items, &submitted);
        Ok(items)
    }

    /// Items of one order.
    pub fn get_order(&self, order_id: &str) -> Result<Vec<OrderItem>> {
        let url = self.url(&["order"], &[("orderId", order_id), ("format", "json")])?;
        debug!(url = %url, "RAPI order URL");
        let res: ItemsResponse = self.get_json(&url, self.query_timeout())?;
        Ok(res.items)
    }

    pub fn get_order_item(&self, item_id: &str) -> Result<Option<OrderItem>> {
        info!(item_id, "Getting order item");
        let url = self.url(&["order"], &[("itemId", item_id), ("format", "json")])?;
        let res: ItemsResponse = self.get_json(&url, self.order_timeout())?;
        Ok(res.items.into_iter().next())
    }

    /// Orders of the account, newest first as the RAPI returns them.
    ///
    /// A start without an end runs until now; an end without a start begins
    /// one month earlier.
    pub fn get_orders(&self, q: &OrderQuery) -> Result<Vec<OrderItem>> {
        let (start, end) = match (q.start, q.end) {
            (Some(s), Some(e)) => (Some(s), Some(e)),
            (Some(s), None) => {
                warn!("A start date was specified without an end date, using current time as end date");
                (Some(s), Some(Utc::now().naive_utc()))
            }
            (None, Some(e)) => {
                warn!("An end date was specified without a start date, using one month before the end date");
                (e.checked_sub_months(Months::new(1)), Some(e))
            }
            (None, None) => (None, None),
        };

        let start = start.map(|d| d.format(RAPI_FORMAT).to_string());
        let end = end.map(|d| d.format(RAPI_FORMAT).to_string());
        let max = q.max_orders.to_string();
        let status = q.status.as_ref().map(|s| s.to_uppercase());

        let mut params: Vec<(&str, &str)> = Vec::new();
        if let Some(s) = &start {
            params.push(("dtstart", s.as_str()));
        }
        if let Some(e) = &end {
            params.push(("dtend", e.as_str()));
        }
        params.push(("maxOrders", max.as_str()));
        if let Some(s) = &status {
            params.push(("status", s.as_str()));
        }
        params.push(("format", "json"));

        info!(status = ?status, start = ?start, end = ?end, "Getting list of orders...");
        let url = self.url(&["order"], &params)?;
        let res: ItemsResponse = self.get_json(&url, self.query_timeout())?;

        Ok(match status {
            Some(s) => res.items.into_iter().filter(|i| i.status == s).collect(),
            None => res.items,
        })
    }

    /// Every item of the orders the given items belong to. Orders that
    /// cannot be fetched are logged and skipped.
    pub fn get_orders_for_items(&self, items: &[OrderItem]) -> Result<Vec<OrderItem>> {
        let mut seen = HashSet::new();
        let mut all = Vec::new();
        for order_id in items.iter().map(|i| i.order_id.as_str()) {
            if !seen.insert(order_id) {
                continue;
            }
            match self.get_order(order_id) {
                Ok(got) => all.extend(got),
                Err(e) => {
                    if is_fatal(&e) {
                        return Err(e);
                    }
                    warn!(order_id, error = %format!("{:#}", e), "Could not get order");
                }
            }
        }
        Ok(all)
    }

    /// The most recently submitted order item for each record.
    pub fn get_orders_by_records(&self, records: &[Record]) -> Result<Vec<OrderItem>> {
        if records.is_empty() {
            bail!("cannot get orders as no records were provided");
        }

        let order_ids: Vec<String> = records
            .iter()
            .filter_map(|r| field_value(r, "orderId").map(value_to_string))
            .collect();
        let orders = if order_ids.len() == records.len() {
            let mut all = Vec::new();
            let mut seen = HashSet::new();
            for id in &order_ids {
                if seen.insert(id.as_str()) {
                    all.extend(self.get_order(id)?);
                }
            }
            all
        } else {
            self.get_orders(&OrderQuery::default())?
        };

        let mut found = Vec::new();
        let mut unfound = Vec::new();
        for record in records {
            let Some(record_id) = field_value(record, "recordId").map(value_to_string) else {
                continue;
            };
            let latest = orders
                .iter()
                .filter(|o| o.record_id == record_id)
                .max_by(|a, b| a.date_submitted.cmp(&b.date_submitted));
            match latest {
                Some(item) => found.push(item.clone()),
                None => unfound.push(record_id),
            }
        }

        info!(count = found.len(), "Found order items for records");
        if !unfound.is_empty() {
            info!(records = %unfound.join(", "), "No order items found for records");
        }
        Ok(found)
    }

    /// Order parameters available for one image.
    pub fn get_order_parameters(&self, collection: &str, record_id: &str) -> Result<Value> {
        let collection = self.get_collection_id(collection)?;
        info!(collection = %collection, record_id, "Getting order parameters");
        let url = self.url(&["order", "params", &collection, record_id], &[("format", "json")])?;
        self.get_json(&url, self.query_timeout())
    }

    /// Cancels one order item; returns the (usually empty) response body.
    pub fn cancel_order_item(&self, order_id: &str, item_id: &str) -> Result<String> {
        info!(order_id, item_id, "Removing order item");
        let url = self.url(&["order", order_id, item_id], &[])?;
        let body = self.api_text::<Value>(Method::DELETE, &url, None, self.order_timeout())?;
        info!("Order removed successfully");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(v: Value) -> OrderItem {
        serde_json::from_value(v).unwrap()
    }

    fn record(v: Value) -> Record {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn order_item_accepts_numeric_ids_and_keeps_extra_keys() {
        let it = item(json!({
            "itemId": 346204, "orderId": "50975", "recordId": 8023427,
            "collectionId": "RCMImageProducts", "status": "SUBMITTED",
            "dateSubmitted": "2021-06-01T12:00:00Z", "orderTag": "x"
        }));
        assert_eq!(it.item_id, "346204");
        assert_eq!(it.record_id, "8023427");
        assert_eq!(it.extra["orderTag"], "x");
        let back = serde_json::to_value(&it).unwrap();
        assert_eq!(back["itemId"], "346204");
        assert_eq!(back["orderTag"], "x");
    }

    #[test]
    fn items_carry_priority_parameters_and_napl_extras() {
        let records = vec![
            record(json!({"RECORD_ID": "1", "COLLECTION_ID": "RCMImageProducts"})),
            record(json!({"recordId": 2, "collectionId": "NAPL", "priority": "urgent"})),
        ];
        let opts = OrderOptions {
            priority: Priority::High,
            parameters: vec![json!({"packagingFormat": "TARGZ"})],
            ..Default::default()
        };
        let items = order_items(&records, &opts).unwrap();
        assert_eq!(
            items[0],
            json!({"collectionId": "RCMImageProducts", "recordId": "1", "priority": "High",
                   "parameters": [{"packagingFormat": "TARGZ"}]})
        );
        assert_eq!(items[1]["priority"], "Urgent");
        assert_eq!(
            items[1]["parameters"],
            json!([{"packagingFormat": "TARGZ"}, {"MediaType": "DIGITAL"}, {"FreeMode": "true"}])
        );
    }

    #[test]
    fn medium_priority_is_omitted() {
        let items = order_items(
            &[record(json!({"recordId": "1", "collectionId": "Radarsat2"}))],
            &OrderOptions::default(),
        )
        .unwrap();
        assert_eq!(items[0], json!({"collectionId": "Radarsat2", "recordId": "1"}));
    }

    #[test]
    fn missing_keys_are_reported() {
        let err = order_items(&[record(json!({"recordId": "1"}))], &OrderOptions::default()).unwrap_err();
        match err.downcast_ref::<RapiError>() {
            Some(RapiError::MissingKey { index, key }) => {
                assert_eq!(*index, 0);
                assert_eq!(key, "collectionId");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn duplicates_removed_but_vap_kept() {
        let items = vec![
            item(json!({"itemId": 1, "orderId": 9, "recordId": 100})),
            item(json!({"itemId": 1, "orderId": 9, "recordId": 100})),
            item(json!({"itemId": 2, "orderId": 9, "recordId": 100})),
            item(json!({"itemId": 3, "orderId": 9, "recordId": 100,
                        "parameters": {"Vap_Request_UUID": "abc"}})),
            item(json!({"itemId": 4, "orderId": 9, "recordId": 100,
                        "parameters": {"Vap_Request_UUID": "def"}})),
            item(json!({"itemId": 5, "orderId": 9, "recordId": 200})),
        ];
        let ids: Vec<String> = remove_duplicate_orders(&items).into_iter().map(|i| i.item_id).collect();
        assert_eq!(ids, vec!["1", "3", "4", "5"]);
    }

    #[test]
    fn finds_items_by_parent_id() {
        let orders = vec![
            item(json!({"itemId": 10, "orderId": 1, "recordId": 5})),
            item(json!({"itemId": 11, "orderId": 1, "recordId": 6,
                        "parameters": {"ParentItemId": 7}})),
        ];
        assert_eq!(find_item_in_orders("10", &orders).unwrap().item_id, "10");
        assert_eq!(find_item_in_orders("7", &orders).unwrap().item_id, "11");
        assert!(find_item_in_orders("8", &orders).is_none());
    }

    #[test]
    fn remote_files_from_destinations() {
        let it = item(json!({
            "itemId": 1, "orderId": 2, "recordId": 3, "status": "AVAILABLE_FOR_DOWNLOAD",
            "destinations": [{"type": "FTP", "stringValue":
                "<a href=\"https://data.example.com/RCM1.zip\" target=\"_blank\">https://data.example.com/RCM1.zip</a></br>"}],
            "manifest": {"RCM1/RCM1.zip": "1024"}
        }));
        assert!(it.is_available());
        assert_eq!(
            it.remote_files(),
            vec![RemoteFile {
                location: "https://data.example.com/RCM1.zip".into(),
                content_length: 1024,
                content_type: None,
            }]
        );
    }

    #[test]
    fn priority_names() {
        assert_eq!("URGENT".parse::<Priority>().unwrap(), Priority::Urgent);
        assert_eq!(Priority::Low.to_string(), "Low");
        assert!("asap".parse::<Priority>().is_err());
    }
}
