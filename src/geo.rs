//! Conversion of user-supplied geometries into the WKT the RAPI accepts.

use anyhow::{Context, Result, anyhow, bail};
use geojson::{GeoJson, Geometry, Value as GeomValue};
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};

use crate::convention::FieldConvention;

const WKT_TYPES: &[&str] = &[
    "GEOMETRYCOLLECTION",
    "MULTIPOLYGON",
    "MULTILINESTRING",
    "MULTIPOINT",
    "POLYGON",
    "LINESTRING",
    "POINT",
];

/// Where a search geometry comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometrySource {
    /// A single WKT geometry.
    Wkt(String),
    /// A GeoJSON geometry, e.g. the `geometry` member of a Feature.
    GeoJson(Geometry),
    /// `(x, y)` pairs: one pair is a point, more make a polygon.
    Points(Vec<(f64, f64)>),
    /// A GeoJSON file; every feature in it becomes a geometry.
    File(PathBuf),
}

impl GeometrySource {
    /// Guesses the kind of a textual source: GeoJSON text, an existing file,
    /// or WKT.
    pub fn detect(src: &str) -> Result<Self> {
        let trimmed = src.trim();
        if trimmed.starts_with('{') {
            let geometry = parse_geojson_geometry(trimmed)?;
            return Ok(GeometrySource::GeoJson(geometry));
        }
        let path = Path::new(trimmed);
        if path.is_file() {
            return Ok(GeometrySource::File(path.to_path_buf()));
        }
        if path.is_dir() {
            bail!("'{}' is a directory, not a geometry file", trimmed);
        }
        Ok(GeometrySource::Wkt(trimmed.to_string()))
    }

    /// WKT strings for this source (a file may hold several features).
    pub fn to_wkt(&self) -> Result<Vec<String>> {
        match self {
            GeometrySource::Wkt(s) => {
                if !is_wkt(s) {
                    bail!("'{}' is not valid WKT", s);
                }
                Ok(vec![s.trim().to_string()])
            }
            GeometrySource::GeoJson(g) => Ok(vec![geometry_to_wkt(&g.value)]),
            GeometrySource::Points(points) => Ok(vec![points_to_wkt(points)?]),
            GeometrySource::File(path) => features_from_file(path),
        }
    }
}

impl From<Geometry> for GeometrySource {
    fn from(g: Geometry) -> Self {
        GeometrySource::GeoJson(g)
    }
}

impl From<Vec<(f64, f64)>> for GeometrySource {
    fn from(points: Vec<(f64, f64)>) -> Self {
        GeometrySource::Points(points)
    }
}

fn parse_geojson_geometry(text: &str) -> Result<Geometry> {
    match text.parse::<GeoJson>().context("invalid GeoJSON")? {
        GeoJson::Geometry(g) => Ok(g),
        GeoJson::Feature(f) => f
            .geometry
            .ok_or_else(|| anyhow!("GeoJSON feature has no geometry")),
        GeoJson::FeatureCollection(_) => {
            bail!("expected a single GeoJSON geometry, got a FeatureCollection")
        }
    }
}

/// Reads every feature geometry from a GeoJSON file.
pub(crate) fn features_from_file(path: &Path) -> Result<Vec<String>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "json" | "geojson" => {}
        "shp" | "kml" | "gml" => bail!(
            "{} files are not supported; convert '{}' to GeoJSON or WKT first",
            ext.to_uppercase(),
            path.display()
        ),
        _ => bail!(
            "the AOI file type of '{}' could not be determined",
            path.display()
        ),
    }

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let geojson: GeoJson = text
        .parse()
        .with_context(|| format!("invalid GeoJSON in {}", path.display()))?;

    let geometries: Vec<Geometry> = match geojson {
        GeoJson::FeatureCollection(fc) => {
            fc.features.into_iter().filter_map(|f| f.geometry).collect()
        }
        GeoJson::Feature(f) => f.geometry.into_iter().collect(),
        GeoJson::Geometry(g) => vec![g],
    };

    if geometries.is_empty() {
        bail!("no geometries found in {}", path.display());
    }
    Ok(geometries.iter().map(|g| geometry_to_wkt(&g.value)).collect())
}

fn coord(position: &[f64]) -> String {
    position
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn coord_list(positions: &[Vec<f64>]) -> String {
    positions
        .iter()
        .map(|p| coord(p))
        .collect::<Vec<_>>()
        .join(", ")
}

fn rings(rings: &[Vec<Vec<f64>>]) -> String {
    rings
        .iter()
        .map(|r| format!("({})", coord_list(r)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Serializes a GeoJSON geometry as WKT.
pub fn geometry_to_wkt(value: &GeomValue) -> String {
    match value {
        GeomValue::Point(p) => format!("POINT ({})", coord(p)),
        GeomValue::MultiPoint(ps) => format!(
            "MULTIPOINT ({})",
            ps.iter()
                .map(|p| format!("({})", coord(p)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        GeomValue::LineString(ls) => format!("LINESTRING ({})", coord_list(ls)),
        GeomValue::MultiLineString(mls) => format!("MULTILINESTRING ({})", rings(mls)),
        GeomValue::Polygon(poly) => format!("POLYGON ({})", rings(poly)),
        GeomValue::MultiPolygon(mp) => format!(
            "MULTIPOLYGON ({})",
            mp.iter()
                .map(|poly| format!("({})", rings(poly)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        GeomValue::GeometryCollection(gs) => format!(
            "GEOMETRYCOLLECTION ({})",
            gs.iter()
                .map(|g| geometry_to_wkt(&g.value))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

/// One point becomes a POINT, more become a closed POLYGON.
pub(crate) fn points_to_wkt(points: &[(f64, f64)]) -> Result<String> {
    match points {
        [] => bail!("no coordinates given"),
        [(x, y)] => Ok(format!("POINT ({} {})", x, y)),
        [_, _] => bail!("two points cannot form a polygon"),
        _ => {
            let mut ring: Vec<Vec<f64>> = points.iter().map(|(x, y)| vec![*x, *y]).collect();
            if ring.first() != ring.last() {
                ring.push(ring[0].clone());
            }
            Ok(format!("POLYGON (({}))", coord_list(&ring)))
        }
    }
}

/// Structural check for a single WKT geometry: a known type keyword,
/// balanced parentheses and numeric coordinates.
pub fn is_wkt(s: &str) -> bool {
    let upper = s.trim().to_uppercase();
    if !WKT_TYPES.iter().any(|t| upper.starts_with(t)) {
        return false;
    }

    let mut depth = 0i32;
    for c in upper.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return false;
    }

    let mut saw_number = false;
    for token in upper.split(|c: char| c == '(' || c == ')' || c == ',' || c.is_whitespace()) {
        if token.is_empty() {
            continue;
        }
        if WKT_TYPES.contains(&token) || matches!(token, "Z" | "M" | "ZM" | "EMPTY") {
            continue;
        }
        if token.parse::<f64>().is_err() {
            return false;
        }
        saw_number = true;
    }
    saw_number || upper.ends_with("EMPTY")
}

/// Converts an image footprint from RAPI results (a GeoJSON geometry or a
/// bare coordinate array) into a closed WKT polygon of its outer ring.
pub fn image_footprint_wkt(geometry: &Value) -> Option<String> {
    let coords = match geometry {
        Value::Object(obj) => obj.get("coordinates")?,
        other => other,
    };

    // Descend until the elements are positions ([x, y]).
    let mut ring = coords.as_array()?;
    loop {
        let first = ring.first()?.as_array()?;
        if first.first()?.is_number() {
            break;
        }
        ring = first;
    }

    let mut points: Vec<Vec<f64>> = ring
        .iter()
        .map(|p| {
            let p = p.as_array()?;
            Some(vec![p.first()?.as_f64()?, p.get(1)?.as_f64()?])
        })
        .collect::<Option<_>>()?;

    if points.len() < 3 {
        return None;
    }
    if points.first() != points.last() {
        points.push(points[0].clone());
    }
    Some(format!("POLYGON (({}))", coord_list(&points)))
}

/// Wraps records into a GeoJSON FeatureCollection; the geometry is read from
/// the convention's `geometry` key and the whole record becomes properties.
pub fn to_feature_collection(records: &[Map<String, Value>], conv: FieldConvention) -> Value {
    let key = conv.convert("geometry");
    let features: Vec<Value> = records
        .iter()
        .map(|rec| {
            json!({
                "type": "Feature",
                "geometry": rec.get(&key).cloned().unwrap_or(Value::Null),
                "properties": rec,
            })
        })
        .collect();

    json!({ "type": "FeatureCollection", "features": features })
}
