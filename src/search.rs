use anyhow::{Result, anyhow};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::collections::CollectionFields;
use crate::dates::DateRange;
use crate::query::{Filter, QuerySpec, SpatialFilter};
use crate::results::Record;

/// Result fields added to every search when the collection has them.
const DEFAULT_RESULT_FIELDS: &[&str] = &["Footprint", "Spatial Resolution", "Download Link", "Archive ID"];

/// A catalog search, built up with chained calls.
///
/// ```no_run
/// # use eodms_rapi::{Filter, SearchRequest, DateRange};
/// let req = SearchRequest::new("RCMImageProducts")
///     .filter(Filter::new("Beam Mode Type", "LIKE", ["%50m%"]))
///     .dates(DateRange::new("20190101_000000", "20210621_000000").unwrap())
///     .max_results(2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRequest {
    collection: String,
    query: QuerySpec,
    result_fields: Vec<String>,
    max_results: Option<usize>,
    first_result: Option<usize>,
}

impl SearchRequest {
    /// `collection` may be an id, alias or title.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Default::default()
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.query.filters.push(filter);
        self
    }

    pub fn feature(mut self, feature: SpatialFilter) -> Self {
        self.query.features.push(feature);
        self
    }

    pub fn dates(mut self, range: DateRange) -> Self {
        self.query.dates.push(range);
        self
    }

    /// Extra result field, by title or id.
    pub fn result_field(mut self, field: impl Into<String>) -> Self {
        self.result_fields.push(field.into());
        self
    }

    pub fn max_results(mut self, n: usize) -> Self {
        self.max_results = Some(n);
        self
    }

    pub fn first_result(mut self, n: usize) -> Self {
        self.first_result = Some(n);
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Record>,
}

impl Client {
    /// Runs a search and returns the matching records.
    pub fn search(&self, req: &SearchRequest) -> Result<Vec<Record>> {
        let (collection, params) = self.search_params(req)?;
        info!(collection = %collection, "Searching for images on RAPI");
        self.submit_search(&collection, &params)
    }

    /// Number of records matching a search, without fetching them.
    pub fn hit_count(&self, req: &SearchRequest) -> Result<u64> {
        let (_, mut params) = self.search_params(req)?;
        params.push(("hitCount".to_string(), "true".to_string()));
        let url = self.search_endpoint(&params)?;
        let res: Value = self.get_json(&url, self.query_timeout())?;
        parse_hit_count(&res).ok_or_else(|| anyhow!("unexpected hit count response: {}", res))
    }

    /// Runs a search given as a RAPI search URL (or just its query string),
    /// optionally narrowed further by `extra`.
    pub fn search_url(&self, url: &str, extra: &QuerySpec) -> Result<Vec<Record>> {
        let query_str = url.split_once('?').map_or(url, |(_, q)| q);
        let mut params: Vec<(String, String)> = url::form_urlencoded::parse(query_str.as_bytes())
            .into_owned()
            .collect();

        let collection = params
            .iter()
            .find(|(k, _)| k == "collection")
            .map(|(_, v)| v.clone())
            .ok_or_else(|| anyhow!("search URL has no collection parameter: {}", url))?;
        let fields = self.get_collection_fields(&collection)?;

        if !extra.is_empty() {
            if let Some(added) = extra.build(&fields, Utc::now().naive_utc()) {
                match params.iter_mut().find(|(k, _)| k == "query") {
                    Some((_, q)) => *q = format!("{} AND {}", q, added),
                    None => params.push(("query".to_string(), added)),
                }
            }
        }

        if let Some((_, rf)) = params.iter_mut().find(|(k, _)| k == "resultField") {
            let mut ids: Vec<String> = rf
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            for name in ["Footprint", "Spatial Resolution"] {
                if let Some(id) = fields.result_field_id(name) {
                    if !ids.iter().any(|i| i == id) {
                        ids.push(id.to_string());
                    }
                }
            }
            *rf = ids.join(",");
        }

        if !params.iter().any(|(k, _)| k == "format") {
            params.push(("format".to_string(), "json".to_string()));
        }

        info!(collection = %collection, "Searching for images on RAPI");
        self.submit_search(&collection, &params)
    }

    fn search_params(&self, req: &SearchRequest) -> Result<(String, Vec<(String, String)>)> {
        let collection = self.get_collection_id(&req.collection)?;
        let fields = self.get_collection_fields(&collection)?;

        let mut params = vec![("collection".to_string(), collection.clone())];
        if let Some(query) = req.query.build(&fields, Utc::now().naive_utc()) {
            params.push(("query".to_string(), query));
        }
        params.push(("resultField".to_string(), result_fields(&fields, &req.result_fields).join(",")));
        if let Some(n) = req.max_results {
            params.push(("maxResults".to_string(), n.to_string()));
        }
        if let Some(n) = req.first_result {
            params.push(("firstResult".to_string(), n.to_string()));
        }
        params.push(("format".to_string(), "json".to_string()));
        Ok((collection, params))
    }

    fn search_endpoint(&self, params: &[(String, String)]) -> Result<String> {
        let pairs: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        self.url(&["search"], &pairs)
    }

    fn submit_search(&self, collection: &str, params: &[(String, String)]) -> Result<Vec<Record>> {
        let url = self.search_endpoint(params)?;
        debug!(url = %url, "RAPI search URL");
        let res: SearchResponse = self.get_json(&url, self.query_timeout())?;
        info!(
            collection,
            count = res.results.len(),
            "Number of images returned from RAPI"
        );
        Ok(res.results)
    }
}

fn result_fields(fields: &CollectionFields, requested: &[String]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for name in requested {
        match fields.result_field_id(name) {
            Some(id) => ids.push(id.to_string()),
            None => warn!(field = %name, "Result field does not exist for collection, excluding it"),
        }
    }
    for name in DEFAULT_RESULT_FIELDS {
        if let Some(id) = fields.result_field_id(name) {
            if !ids.iter().any(|i| i == id) {
                ids.push(id.to_string());
            }
        }
    }
    ids
}

fn parse_hit_count(res: &Value) -> Option<u64> {
    fn number(v: &Value) -> Option<u64> {
        v.as_u64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
    }
    number(res).or_else(|| {
        ["hitCount", "count", "totalResults"]
            .iter()
            .find_map(|k| res.get(*k).and_then(number))
    })
}
