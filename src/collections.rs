//! Collections available to the account and the fields each one exposes.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::client::Client;
use crate::error::RapiError;
use crate::util::de_scalar;

/// A collection the account can search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionSummary {
    pub id: String,
    pub title: String,
    /// Short names accepted in place of the id (`rcm`, `r2`, ...).
    pub aliases: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(deserialize_with = "de_scalar")]
    pub value: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub datatype: Option<String>,
    #[serde(default)]
    pub choices: Option<Vec<Choice>>,
}

/// Search and result fields of one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionFields {
    #[serde(rename = "searchFields", default)]
    pub search: Vec<FieldInfo>,
    #[serde(rename = "resultFields", default)]
    pub results: Vec<FieldInfo>,
}

/// What [`Client::get_field_choices`] knows about a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldChoices {
    /// Non-empty choice values.
    Values(Vec<String>),
    /// The field is free-form; only its datatype is known.
    DataType(Option<String>),
}

impl CollectionFields {
    /// A search field by title, or by id.
    pub fn search_field(&self, name: &str) -> Option<&FieldInfo> {
        self.search
            .iter()
            .find(|f| f.title == name)
            .or_else(|| self.search.iter().find(|f| f.id == name))
    }

    pub fn search_field_id(&self, name: &str) -> Option<&str> {
        self.search_field(name).map(|f| f.id.as_str())
    }

    /// A result field id by exact title, a title containing `name`, or id.
    pub fn result_field_id(&self, name: &str) -> Option<&str> {
        self.results
            .iter()
            .find(|f| f.title == name)
            .or_else(|| self.results.iter().find(|f| f.title.contains(name)))
            .or_else(|| self.results.iter().find(|f| f.id == name))
            .map(|f| f.id.as_str())
    }

    /// Datatype of the search field with this id.
    pub fn field_type(&self, field_id: &str) -> Option<&str> {
        self.search
            .iter()
            .find(|f| f.id == field_id)
            .and_then(|f| f.datatype.as_deref())
    }

    pub fn search_titles(&self) -> Vec<&str> {
        self.search.iter().map(|f| f.title.as_str()).collect()
    }

    pub fn search_ids(&self) -> Vec<&str> {
        self.search.iter().map(|f| f.id.as_str()).collect()
    }

    pub fn result_titles(&self) -> Vec<&str> {
        self.results.iter().map(|f| f.title.as_str()).collect()
    }

    pub fn result_ids(&self) -> Vec<&str> {
        self.results.iter().map(|f| f.id.as_str()).collect()
    }

    /// Keeps only the search fields the EODMS website offers for
    /// `collection`. Collections without a known list are left unchanged.
    pub fn ui_only(&self, collection: &str) -> CollectionFields {
        match ui_fields(collection) {
            Some(ids) => CollectionFields {
                search: self
                    .search
                    .iter()
                    .filter(|f| ids.contains(&f.id.as_str()))
                    .cloned()
                    .collect(),
                results: self.results.clone(),
            },
            None => self.clone(),
        }
    }
}

impl FieldInfo {
    fn field_choices(&self) -> FieldChoices {
        match &self.choices {
            Some(choices) => FieldChoices::Values(
                choices
                    .iter()
                    .filter(|c| !c.value.is_empty())
                    .map(|c| c.value.clone())
                    .collect(),
            ),
            None => FieldChoices::DataType(self.datatype.clone()),
        }
    }
}

/// In-process cache of collection metadata.
#[derive(Debug, Default)]
pub(crate) struct Catalog {
    collections: Option<Vec<CollectionSummary>>,
    fields: HashMap<String, CollectionFields>,
}

fn aliases(collection_id: &str) -> Vec<&'static str> {
    match collection_id {
        "RCMImageProducts" => vec!["rcm"],
        "Radarsat1" => vec!["r1", "rs1", "radarsat", "radarsat-1"],
        "Radarsat2" => vec!["r2", "rs2", "radarsat-2"],
        "PlanetScope" => vec!["planet"],
        _ => Vec::new(),
    }
}

/// Search field ids shown by the EODMS website, per collection.
fn ui_fields(collection_id: &str) -> Option<&'static [&'static str]> {
    let fields: &'static [&'static str] = match collection_id {
        "ALOS-2" => &[
            "Look Direction",
            "SENSOR_BEAM.SPATIAL_RESOLUTION",
            "ARCHIVE_IMAGE.PRODUCT_TYPE",
            "PRODUCT_FORMAT.FORMAT_NAME_E",
            "sarsat.SBEAM",
            "sarsat.REC_POL",
            "sarsat.TR_POL",
            "SENSOR_BEAM_CONFIG.INCIDENCE_HIGH",
            "SENSOR_BEAM_CONFIG.INCIDENCE_LOW",
        ],
        "COSMO-SkyMed1" => &[
            "ARCHIVE_IMAGE.ORDER_KEY",
            "SENSOR_BEAM.SPATIAL_RESOLUTION",
            "csmed.ORBIT_ABS",
        ],
        "DMC" => &[
            "ARCHIVE_IMAGE.ORDER_KEY",
            "SENSOR_BEAM.SPATIAL_RESOLUTION",
            "DMC.CLOUD_PERCENT",
            "DMC.INCIDENCE_ANGLE",
        ],
        "Gaofen-1" | "PlanetScope" => &[
            "ARCHIVE_IMAGE.ORDER_KEY",
            "SENSOR_BEAM.SPATIAL_RESOLUTION",
            "SATOPT.CLOUD_PERCENT",
            "SATOPT.SENS_INC",
        ],
        "GeoEye-1" => &[
            "ARCHIVE_IMAGE.ORDER_KEY",
            "SENSOR_BEAM.SPATIAL_RESOLUTION",
            "GE1.CLOUD_PERCENT",
            "GE1.SENS_INC",
            "GE1.SBEAM",
        ],
        "IKONOS" => &[
            "ARCHIVE_IMAGE.ORDER_KEY",
            "SENSOR_BEAM.SPATIAL_RESOLUTION",
            "IKONOS.CLOUD_PERCENT",
            "IKONOS.SENS_INC",
            "IKONOS.SBEAM",
        ],
        "IRS" => &[
            "ARCHIVE_IMAGE.ORDER_KEY",
            "SENSOR_BEAM.SPATIAL_RESOLUTION",
            "IRS.CLOUD_PERCENT",
            "IRS.SENS_INC",
            "IRS.SBEAM",
        ],
        "NAPL" => &[
            "ARCHIVE_IMAGE.ORDER_KEY",
            "PHOTO.SBEAM",
            "FLIGHT_SEGMENT.SCALE",
            "ROLL.ROLL_NUMBER",
            "PHOTO.PHOTO_NUMBER",
            "CATALOG_IMAGE.OPEN_DATA",
            "PREVIEW_AVAILABLE",
        ],
        "QuickBird-2" => &[
            "ARCHIVE_IMAGE.ORDER_KEY",
            "SENSOR_BEAM.SPATIAL_RESOLUTION",
            "QB2.CLOUD_PERCENT",
            "QB2.SENS_INC",
            "QB2.SBEAM",
        ],
        "Radarsat1" => &[
            "ARCHIVE_IMAGE.ORDER_KEY",
            "SENSOR_BEAM.SPATIAL_RESOLUTION",
            "RSAT1.ORBIT_DIRECTION",
            "RSAT1.INCIDENCE_ANGLE",
            "RSAT1.SBEAM",
            "RSAT1.BEAM_MNEMONIC",
            "RSAT1.ORBIT_ABS",
            "ARCHIVE_IMAGE.PRODUCT_TYPE",
            "ARCHIVE_IMAGE.PRODUCT_ID",
            "PROCESSING_LEVEL_LUT.PROCESSING_LEVEL",
        ],
        "Radarsat1RawProducts" => &[
            "SENSOR_BEAM.SPATIAL_RESOLUTION",
            "RSAT1.ORBIT_DIRECTION",
            "RSAT1.INCIDENCE_ANGLE",
            "RSAT1.DATASET_ID",
            "ARCHIVE_CUF.ARCHIVE_FACILITY",
            "ARCHIVE_CUF.RECEPTION_FACILITY",
            "RSAT1.SBEAM",
            "RSAT1.BEAM_MNEMONIC",
            "RSAT1.ORBIT_ABS",
        ],
        "Radarsat2" => &[
            "ARCHIVE_IMAGE.ORDER_KEY",
            "SENSOR_BEAM.SPATIAL_RESOLUTION",
            "RSAT2.ORBIT_DIRECTION",
            "RSAT2.INCIDENCE_ANGLE",
            "CATALOG_IMAGE.SEQUENCE_ID",
            "RSAT2.SBEAM",
            "RSAT2.BEAM_MNEMONIC",
            "RSAT2.ANTENNA_ORIENTATION",
            "RSAT2.TR_POL",
            "RSAT2.REC_POL",
            "RSAT2.IMAGE_ID",
            "RSAT2.ORBIT_REL",
        ],
        "Radarsat2RawProducts" => &[
            "SENSOR_BEAM.SPATIAL_RESOLUTION",
            "RSAT2.ORBIT_DIRECTION",
            "RSAT2.INCIDENCE_ANGLE",
            "RSAT2.ANTENNA_ORIENTATION",
            "RSAT2.SBEAM",
            "RSAT2.BEAM_MNEMONIC",
            "RSAT2.TR_POL",
            "RSAT2.REC_POL",
            "RSAT2.IMAGE_ID",
        ],
        "RapidEye" => &[
            "ARCHIVE_IMAGE.ORDER_KEY",
            "SENSOR_BEAM.SPATIAL_RESOLUTION",
            "RE.CLOUD_PERCENT",
            "RE.SENS_INC",
            "RE.SBEAM",
        ],
        "RCMImageProducts" => &[
            "ARCHIVE_IMAGE.ORDER_KEY",
            "SENSOR_BEAM.SPATIAL_RESOLUTION",
            "RCM.ORBIT_DIRECTION",
            "RCM.INCIDENCE_ANGLE",
            "RCM.BEAM_MNEMONIC",
            "SENSOR_BEAM_CONFIG.BEAM_MODE_QUALIFIER",
            "RCM.SBEAM",
            "RCM.DOWNLINK_SEGMENT_ID",
            "LUTApplied",
            "CATALOG_IMAGE.OPEN_DATA",
            "RCM.POLARIZATION",
            "PRODUCT_FORMAT.FORMAT_NAME_E",
            "ARCHIVE_IMAGE.PRODUCT_TYPE",
            "RCM.ORBIT_REL",
            "RCM.WITHIN_ORBIT_TUBE",
            "CATALOG_IMAGE.SEQUENCE_ID",
            "RCM.SPECIAL_HANDLING_REQUIRED",
            "RCM.ORBIT_DATA_SOURCE",
            "CATALOG_IMAGE.PUBLIC_GOOD",
        ],
        "RCMScienceData" => &[
            "SENSOR_BEAM.SPATIAL_RESOLUTION",
            "RCM.ORBIT_DIRECTION",
            "RCM.INCIDENCE_ANGLE",
            "RCM.SBEAM",
            "RCM.BEAM_MNEMONIC",
            "CUF_RCM.TR_POL",
            "CUF_RCM.REC_POL",
            "RCM.DOWNLINK_SEGMENT_ID",
        ],
        "SGBAirPhotos" => &[
            "ARCHIVE_IMAGE.ORDER_KEY",
            "FLIGHT_SEGMENT.SCALE",
            "ROLL.ROLL_NUMBER",
            "PHOTO.PHOTO_NUMBER",
            "Area",
        ],
        "SPOT" => &[
            "ARCHIVE_IMAGE.ORDER_KEY",
            "SENSOR_BEAM.SPATIAL_RESOLUTION",
            "SPOT.CLOUD_PERCENT",
            "SPOT.SENS_INC",
        ],
        "TerraSarX" => &[
            "ARCHIVE_IMAGE.ORDER_KEY",
            "SENSOR_BEAM.SPATIAL_RESOLUTION",
            "TSX1.ORBIT_DIRECTION",
            "INCIDENCE_ANGLE",
        ],
        "VASP" => &["CATALOG_SERIES.CEOID"],
        "WorldView-1" => &[
            "ARCHIVE_IMAGE.ORDER_KEY",
            "SENSOR_BEAM.SPATIAL_RESOLUTION",
            "WV1.CLOUD_PERCENT",
            "WV1.SENS_INC",
            "WV1.SBEAM",
        ],
        "WorldView-2" => &[
            "ARCHIVE_IMAGE.ORDER_KEY",
            "SENSOR_BEAM.SPATIAL_RESOLUTION",
            "WV2.CLOUD_PERCENT",
            "WV2.SENS_INC",
            "WV2.SBEAM",
        ],
        "WorldView-3" => &[
            "ARCHIVE_IMAGE.ORDER_KEY",
            "SENSOR_BEAM.SPATIAL_RESOLUTION",
            "WV3.CLOUD_PERCENT",
            "WV3.SENS_INC",
            "WV3.SBEAM",
        ],
        _ => return None,
    };
    Some(fields)
}

// The collections endpoint nests collections under satellite/sensor groups.
#[derive(Debug, Deserialize)]
struct CollectionNode {
    #[serde(rename = "collectionId", default)]
    collection_id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    children: Vec<CollectionNode>,
}

fn flatten_nodes(nodes: Vec<CollectionNode>, out: &mut Vec<CollectionSummary>) {
    for node in nodes {
        if let Some(id) = node.collection_id {
            if !out.iter().any(|c| c.id == id) {
                out.push(CollectionSummary {
                    aliases: aliases(&id),
                    id,
                    title: node.title,
                });
            }
        }
        flatten_nodes(node.children, out);
    }
}

/// Resolves an id, alias or title (case-insensitive) against `collections`.
pub(crate) fn resolve_collection<'a>(
    collections: &'a [CollectionSummary],
    name: &str,
) -> Option<&'a CollectionSummary> {
    let lower = name.trim().to_lowercase();
    collections
        .iter()
        .find(|c| c.id == name)
        .or_else(|| collections.iter().find(|c| c.id.to_lowercase() == lower))
        .or_else(|| collections.iter().find(|c| c.aliases.contains(&lower.as_str())))
        .or_else(|| collections.iter().find(|c| c.title.to_lowercase() == lower))
}

impl Client {
    /// Collections available to the account. Cached after the first call
    /// unless `refresh` is set.
    pub fn get_collections(&self, refresh: bool) -> Result<Vec<CollectionSummary>> {
        if !refresh {
            let catalog = self.catalog.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(collections) = &catalog.collections {
                return Ok(collections.clone());
            }
        }

        info!("Getting Collection information, please wait...");
        let url = self.url(&["collections"], &[("format", "json")])?;
        let nodes: Vec<CollectionNode> = self.get_json(&url, self.query_timeout())?;

        let mut collections = Vec::new();
        flatten_nodes(nodes, &mut collections);
        debug!(count = collections.len(), "collections loaded");

        let mut catalog = self.catalog.lock().unwrap_or_else(|e| e.into_inner());
        catalog.collections = Some(collections.clone());
        Ok(collections)
    }

    /// The RAPI collection id for an id, alias or title.
    pub fn get_collection_id(&self, name: &str) -> Result<String> {
        let collections = self.get_collections(false)?;
        resolve_collection(&collections, name)
            .map(|c| c.id.clone())
            .ok_or_else(|| RapiError::UnknownCollection(name.to_string()).into())
    }

    /// Search and result fields for a collection, fetched once per client.
    pub fn get_collection_fields(&self, collection: &str) -> Result<CollectionFields> {
        let id = self.get_collection_id(collection)?;
        {
            let catalog = self.catalog.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(fields) = catalog.fields.get(&id) {
                return Ok(fields.clone());
            }
        }

        let url = self.url(&["collections", &id], &[("format", "json")])?;
        let fields: CollectionFields = self.get_json(&url, self.query_timeout())?;

        let mut catalog = self.catalog.lock().unwrap_or_else(|e| e.into_inner());
        catalog.fields.insert(id, fields.clone());
        Ok(fields)
    }

    /// Fields of a collection; `ui_only` restricts the search fields to
    /// those offered on the EODMS website.
    pub fn get_available_fields(&self, collection: &str, ui_only: bool) -> Result<CollectionFields> {
        let id = self.get_collection_id(collection)?;
        let fields = self.get_collection_fields(&id)?;
        Ok(if ui_only { fields.ui_only(&id) } else { fields })
    }

    /// Choices (or the datatype) of one search field, by title or id.
    pub fn get_field_choices(&self, collection: &str, field: &str) -> Result<FieldChoices> {
        let fields = self.get_collection_fields(collection)?;
        match fields.search_field(field) {
            Some(info) => Ok(info.field_choices()),
            None => bail!("no search field named '{}' in collection '{}'", field, collection),
        }
    }

    /// Choices (or datatypes) of every search field, keyed by title.
    pub fn get_all_field_choices(&self, collection: &str) -> Result<Vec<(String, FieldChoices)>> {
        let fields = self.get_collection_fields(collection)?;
        Ok(fields
            .search
            .iter()
            .map(|f| (f.title.clone(), f.field_choices()))
            .collect())
    }
}
