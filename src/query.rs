//! Translation of filters, geometries and date ranges into the RAPI
//! `query` parameter.

use chrono::NaiveDateTime;
use tracing::warn;

use crate::collections::{CollectionFields, FieldInfo};
use crate::dates::{DateRange, parse_datetime};
use crate::geo::{GeometrySource, points_to_wkt};

/// Fields whose `a-b` values are searched as inclusive ranges.
const RANGE_FIELDS: &[&str] = &[
    "Incidence Angle",
    "Scale",
    "Spatial Resolution",
    "Spacial Resolution",
    "Absolute Orbit",
];

const UNQUOTED_FIELDS: &[&str] = &["RCM.SPECIAL_HANDLING_REQUIRED"];

/// A condition on one search field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Field title (`Beam Mnemonic`) or id (`RCM.BEAM_MNEMONIC`).
    pub field: String,
    /// `=`, `<=`, `LIKE`, ...
    pub operator: String,
    /// Alternatives, OR-ed together.
    pub values: Vec<String>,
}

impl Filter {
    pub fn new<I, V>(field: impl Into<String>, operator: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        Self {
            field: field.into(),
            operator: operator.into(),
            values: values.into_iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl ToString) -> Self {
        Self::new(field, "=", [value])
    }
}

/// A geometry the image footprint is compared with.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialFilter {
    pub operator: String,
    pub source: GeometrySource,
}

impl SpatialFilter {
    pub fn new(operator: impl Into<String>, source: impl Into<GeometrySource>) -> Self {
        Self {
            operator: operator.into(),
            source: source.into(),
        }
    }

    pub fn intersects(source: impl Into<GeometrySource>) -> Self {
        Self::new("INTERSECTS", source)
    }
}

/// Everything that goes into a search's `query` parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    pub filters: Vec<Filter>,
    pub features: Vec<SpatialFilter>,
    pub dates: Vec<DateRange>,
}

impl QuerySpec {
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty() && self.features.is_empty() && self.dates.is_empty()
    }

    /// Builds the query against a collection's fields. Filters on unknown
    /// fields and unusable geometries are logged and left out. Returns
    /// `None` when nothing remains.
    pub(crate) fn build(&self, fields: &CollectionFields, now: NaiveDateTime) -> Option<String> {
        let mut clauses = Vec::new();

        if let Some(dates) = self.date_clause(fields, now) {
            clauses.push(dates);
        }
        if let Some(features) = self.feature_clause(fields) {
            clauses.push(features);
        }
        for filter in &self.filters {
            clauses.extend(filter_clauses(filter, fields));
        }

        if clauses.is_empty() {
            return None;
        }
        if clauses.len() > 1 {
            for clause in clauses.iter_mut() {
                if clause.contains(" OR ") && !is_grouped(clause) {
                    *clause = format!("({})", clause);
                }
            }
        }
        Some(clauses.join(" AND "))
    }

    fn date_clause(&self, fields: &CollectionFields, now: NaiveDateTime) -> Option<String> {
        if self.dates.is_empty() {
            return None;
        }
        let Some(field_id) = fields
            .search_field_id("Acquisition Start Date")
            .or_else(|| fields.search_field_id("Start Date"))
        else {
            warn!("Collection has no start date field, ignoring date ranges");
            return None;
        };

        let ranges: Vec<String> = self
            .dates
            .iter()
            .map(|range| {
                let (start, end) = range.bounds(now);
                format!("{id}>='{start}' AND {id}<='{end}'", id = field_id)
            })
            .collect();
        Some(format!("({})", ranges.join(" OR ")))
    }

    fn feature_clause(&self, fields: &CollectionFields) -> Option<String> {
        if self.features.is_empty() {
            return None;
        }
        let Some(field_id) = fields.search_field_id("Footprint") else {
            warn!("Collection has no Footprint field, ignoring geometry features");
            return None;
        };

        let mut geoms = Vec::new();
        for (idx, feature) in self.features.iter().enumerate() {
            let op = feature.operator.trim().to_uppercase();
            match feature.source.to_wkt() {
                Ok(wkts) => {
                    for wkt in wkts {
                        if op == "=" {
                            geoms.push(format!("{}{}'{}'", field_id, op, wkt));
                        } else {
                            geoms.push(format!("{} {} {}", field_id, op, wkt));
                        }
                    }
                }
                Err(e) => warn!(
                    feature = idx + 1,
                    error = %e,
                    "Geometry feature could not be determined, excluding it from search"
                ),
            }
        }

        if geoms.is_empty() {
            None
        } else {
            Some(format!("({})", geoms.join(" OR ")))
        }
    }
}

fn filter_clauses(filter: &Filter, fields: &CollectionFields) -> Vec<String> {
    let Some(info) = fields.search_field(&filter.field) else {
        warn!(field = %filter.field, "No available field with this name, skipping filter");
        return Vec::new();
    };
    let values: Vec<&str> = filter
        .values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        warn!(field = %filter.field, "No value given for field, skipping filter");
        return Vec::new();
    }

    let id = info.id.as_str();
    let op = operator(&filter.operator);

    if RANGE_FIELDS.contains(&info.title.as_str()) || RANGE_FIELDS.contains(&filter.field.as_str()) {
        return values
            .iter()
            .map(|v| match v.split_once('-') {
                Some((a, b)) if !a.trim().is_empty() && !b.trim().is_empty() => {
                    format!("({id}>={} AND {id}<={})", a.trim(), b.trim())
                }
                _ => format!("{}{}{}", id, op, v),
            })
            .collect();
    }

    if UNQUOTED_FIELDS.contains(&id) {
        return vec![format!("{}{}{}", id, op, values[0])];
    }

    if info.title == "Footprint" {
        return match footprint_wkt(values[0]) {
            Some(wkt) => vec![format!("{}{}{}", id, op, wkt)],
            None => {
                warn!(value = values[0], "Footprint filter needs 'x1 y1 x2 y2 ...' coordinates");
                Vec::new()
            }
        };
    }

    let exprs: Vec<String> = values
        .iter()
        .map(|v| expression(info, &op, &choice_value(info, v)))
        .collect();
    vec![exprs.join(" OR ")]
}

/// Word operators such as `LIKE` need spaces around them.
fn operator(op: &str) -> String {
    let op = op.trim();
    if op.contains(['=', '<', '>']) {
        op.to_string()
    } else {
        format!(" {} ", op)
    }
}

fn choice_value(info: &FieldInfo, value: &str) -> String {
    info.choices
        .iter()
        .flatten()
        .find(|c| c.label.as_deref() == Some(value))
        .map(|c| c.value.clone())
        .unwrap_or_else(|| value.to_string())
}

fn expression(info: &FieldInfo, op: &str, value: &str) -> String {
    let id = &info.id;
    match info.datatype.as_deref() {
        Some("String") => format!("{}{}'{}'", id, op, value),
        Some("Boolean") => {
            let lower = value.to_lowercase();
            let is_choice = info
                .choices
                .iter()
                .flatten()
                .any(|c| c.value.to_lowercase() == lower);
            if is_choice {
                format!("{}{}'{}'", id, op, value)
            } else if lower.contains('t') || lower.contains('y') {
                format!("{}{}true", id, op)
            } else if lower.contains('f') || lower.contains('n') {
                format!("{}{}false", id, op)
            } else {
                format!("{}{}'{}'", id, op, value)
            }
        }
        Some("DateTimeRange") => match parse_datetime(value) {
            Some(dt) => format!("{}{}'{}'", id, op, dt.format("%Y-%m-%dT%H:%M:%S")),
            None => format!("{}{}'{}'", id, op, value),
        },
        _ => format!("{}{}{}", id, op, value),
    }
}

fn footprint_wkt(value: &str) -> Option<String> {
    let nums: Vec<f64> = value
        .split_whitespace()
        .map(|n| n.parse().ok())
        .collect::<Option<_>>()?;
    if nums.len() % 2 != 0 {
        return None;
    }
    let points: Vec<(f64, f64)> = nums.chunks(2).map(|p| (p[0], p[1])).collect();
    points_to_wkt(&points).ok()
}

/// True when the whole clause is one parenthesized group.
fn is_grouped(clause: &str) -> bool {
    if !clause.starts_with('(') || !clause.ends_with(')') {
        return false;
    }
    let mut depth = 0i32;
    for (i, c) in clause.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 && i != clause.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
    }
    true
}
