use anyhow::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::client::Client;
use crate::convention::FieldConvention;
use crate::error::is_fatal;
use crate::geo::{image_footprint_wkt, to_feature_collection};

/// A search result or record as a JSON object.
pub type Record = Map<String, Value>;

/// Shape of the records returned by [`Client::get_results`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResultFormat {
    /// Records exactly as the RAPI returned them.
    #[default]
    Raw,
    /// Flattened metadata in the active field convention.
    Brief,
    /// Full record metadata fetched per result, plus a WKT footprint.
    Full,
    /// A GeoJSON FeatureCollection over the full metadata.
    GeoJson,
}

impl std::str::FromStr for ResultFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "raw" => Ok(ResultFormat::Raw),
            "brief" => Ok(ResultFormat::Brief),
            "full" => Ok(ResultFormat::Full),
            "geojson" => Ok(ResultFormat::GeoJson),
            other => bail!("unknown result format '{}' (expected raw, brief, full or geojson)", other),
        }
    }
}

/// Looks a key up under its own name and every field convention.
pub(crate) fn field_value<'a>(record: &'a Record, name: &str) -> Option<&'a Value> {
    record.get(name).or_else(|| {
        FieldConvention::ALL
            .iter()
            .find_map(|conv| record.get(&conv.convert(name)))
    })
}

/// Flattens a RAPI record: `recordId`, `collectionId` and `geometry` first,
/// `metadata2` label/value pairs as keys, every key in `conv`. Records
/// without a `metadata` entry are returned unchanged.
pub fn parse_metadata(record: &Record, conv: FieldConvention, with_wkt: bool) -> Record {
    if !record.contains_key("metadata") {
        return record.clone();
    }

    let mut out = Record::new();
    let leading = ["recordId", "collectionId", "geometry"];
    for key in leading {
        if let Some(v) = record.get(key) {
            out.insert(conv.convert(key), v.clone());
        }
    }
    let exclude: Vec<String> = leading.iter().map(|k| conv.convert(k)).collect();

    for (k, v) in record {
        match k.as_str() {
            "metadata" => {}
            "metadata2" => {
                for entry in v.as_array().into_iter().flatten() {
                    let Some(label) = entry.get("label").and_then(Value::as_str) else {
                        continue;
                    };
                    let key = conv.convert(label);
                    if !exclude.contains(&key) {
                        out.insert(key, entry.get("value").cloned().unwrap_or(Value::Null));
                    }
                }
            }
            _ => {
                let key = conv.convert(k);
                if !exclude.contains(&key) {
                    out.insert(key, v.clone());
                }
            }
        }
    }

    if with_wkt {
        if let Some(geom) = record.get("geometry") {
            let wkt = image_footprint_wkt(geom).map(Value::String).unwrap_or(Value::Null);
            out.insert(conv.convert("WKT Geometry"), wkt);
        }
    }
    out
}

/// Converts every key of already-flattened records to `conv`.
pub fn rekey(records: &[Record], conv: FieldConvention) -> Vec<Record> {
    records
        .iter()
        .map(|r| r.iter().map(|(k, v)| (conv.convert(k), v.clone())).collect())
        .collect()
}

impl Client {
    /// Returns `records` in the requested format: a JSON array for `Raw`,
    /// `Brief` and `Full`, a FeatureCollection for `GeoJson`.
    pub fn get_results(&self, records: &[Record], form: ResultFormat) -> Result<Value> {
        let conv = self.field_convention();
        let out = match form {
            ResultFormat::Raw => records.iter().cloned().map(Value::Object).collect(),
            ResultFormat::Brief => records
                .iter()
                .map(|r| Value::Object(parse_metadata(r, conv, false)))
                .collect(),
            ResultFormat::Full => self
                .fetch_full_metadata(records)?
                .into_iter()
                .map(Value::Object)
                .collect(),
            ResultFormat::GeoJson => {
                let full = self.fetch_full_metadata(records)?;
                return Ok(to_feature_collection(&full, conv));
            }
        };
        Ok(Value::Array(out))
    }

    /// Fetches every record's `thisRecordUrl`, one after another. A record
    /// that cannot be fetched is kept as is with an `issue` entry.
    pub fn fetch_full_metadata(&self, records: &[Record]) -> Result<Vec<Record>> {
        let conv = self.field_convention();
        let pb = if self.progress() {
            let pb = ProgressBar::new(records.len() as u64);
            pb.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} Fetching result metadata {pos}/{len} {wide_bar} {eta}",
                )
                .context("invalid progress bar template")?
                .progress_chars("=>-"),
            );
            pb
        } else {
            ProgressBar::hidden()
        };

        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let fetched = match record.get("thisRecordUrl").and_then(Value::as_str) {
                Some(url) => self.fetch_record_url(url),
                None => Err(anyhow::anyhow!("record has no thisRecordUrl")),
            };
            let full = match fetched {
                Ok(full) => full,
                Err(e) => {
                    if is_fatal(&e) {
                        pb.finish_and_clear();
                        return Err(e);
                    }
                    let issue = format!("Could not retrieve full metadata due to: {:#}", e);
                    warn!("{}", issue);
                    let mut rec = record.clone();
                    rec.insert("issue".to_string(), Value::String(issue));
                    rec
                }
            };
            out.push(parse_metadata(&full, conv, true));
            pb.inc(1);
        }
        pb.finish_and_clear();
        Ok(out)
    }

    fn fetch_record_url(&self, url: &str) -> Result<Record> {
        let mut parsed = url::Url::parse(url).with_context(|| format!("invalid record URL: {}", url))?;
        if !parsed.query_pairs().any(|(k, _)| k == "format") {
            parsed.query_pairs_mut().append_pair("format", "json");
        }
        self.get_json(parsed.as_str(), self.query_timeout())
    }

    /// One image record by collection and record id.
    pub fn get_record(&self, collection: &str, record_id: &str, form: ResultFormat) -> Result<Value> {
        let collection = self.get_collection_id(collection)?;
        let url = self.url(&["record", &collection, record_id], &[("format", "json")])?;
        info!(collection = %collection, record_id, "Getting record");
        let record: Record = self.get_json(&url, self.query_timeout())?;

        let conv = self.field_convention();
        Ok(match form {
            ResultFormat::Raw => Value::Object(record),
            ResultFormat::Brief => Value::Object(parse_metadata(&record, conv, false)),
            ResultFormat::Full => Value::Object(parse_metadata(&record, conv, true)),
            ResultFormat::GeoJson => {
                to_feature_collection(&[parse_metadata(&record, conv, true)], conv)
            }
        })
    }
}
