#![allow(dead_code)]

use eodms_rapi::{Client, ClientConfig};
use httpmock::prelude::*;
use serde_json::{Value, json};
use std::time::Duration;

pub const ROOT: &str = "/wes/rapi";

pub fn client(server: &MockServer) -> Client {
    Client::with_config(ClientConfig {
        url: server.url(ROOT),
        username: "tester".to_string(),
        password: "not-a-real-password".to_string(),
        verify: true,
    })
    .expect("client")
    .with_attempts(3)
    .with_retry_wait(Duration::ZERO)
    .with_progress(false)
}

pub fn path(rest: &str) -> String {
    format!("{}/{}", ROOT, rest)
}

pub fn collections_body() -> Value {
    json!([
        {
            "title": "RADARSAT Constellation Mission",
            "children": [
                {"collectionId": "RCMImageProducts", "title": "RCM Image Products"},
                {"collectionId": "RCMScienceData", "title": "RCM Science Data"}
            ]
        },
        {"collectionId": "Radarsat2", "title": "RADARSAT-2"},
        {"collectionId": "NAPL", "title": "National Air Photo Library"}
    ])
}

pub fn rcm_fields_body() -> Value {
    json!({
        "searchFields": [
            {"id": "RCM.BEAM_MNEMONIC", "title": "Beam Mnemonic", "datatype": "String"},
            {"id": "RCM.SBEAM", "title": "Beam Mode Type", "datatype": "String",
             "choices": [
                 {"value": "Medium Resolution 16m", "label": "Medium Resolution 16m"},
                 {"value": "Low Resolution 100m", "label": "Low Resolution 100m"}
             ]},
            {"id": "CATALOG_IMAGE.START_DATETIME", "title": "Acquisition Start Date", "datatype": "DateTimeRange"},
            {"id": "FOOTPRINT", "title": "Footprint", "datatype": "Polygon"},
            {"id": "CATALOG_IMAGE.OPEN_DATA", "title": "Open Data", "datatype": "Boolean",
             "choices": [{"value": true, "label": "Yes"}, {"value": false, "label": "No"}]}
        ],
        "resultFields": [
            {"id": "RCM.FOOTPRINT", "title": "Footprint", "datatype": "Polygon"},
            {"id": "SENSOR_BEAM.SPATIAL_RESOLUTION", "title": "Spatial Resolution", "datatype": "Numeric"},
            {"id": "ARCHIVE_IMAGE.PROCESSING_DATETIME", "title": "Processing Date", "datatype": "DateTime"}
        ]
    })
}

pub fn search_result(record_id: &str) -> Value {
    json!({
        "recordId": record_id,
        "collectionId": "RCMImageProducts",
        "title": format!("RCM1_OK{}_PK{}_2_16M17_20210621_111552_HH_HV_GRD", record_id, record_id),
        "thisRecordUrl": format!("https://www.eodms-sgdot.nrcan-rncan.gc.ca/wes/rapi/record/RCMImageProducts/{}", record_id),
        "metadata2": [
            {"id": "RCM.BEAM_MNEMONIC", "label": "Beam Mnemonic", "value": "16M17"},
            {"id": "SENSOR_BEAM.SPATIAL_RESOLUTION", "label": "Spatial Resolution", "value": "16"}
        ],
        "metadata": [["Beam Mnemonic", "16M17"]],
        "geometry": {"type": "Polygon", "coordinates": [[[-76, 45], [-75, 45], [-75, 46], [-76, 45]]]}
    })
}

/// Collections and RCM fields, each expected to be fetched once.
pub fn mock_catalog(server: &MockServer) -> (httpmock::Mock<'_>, httpmock::Mock<'_>) {
    let collections = server.mock(|when, then| {
        when.method(GET)
            .path(path("collections"))
            .query_param("format", "json");
        then.status(200).json_body(collections_body());
    });
    let fields = server.mock(|when, then| {
        when.method(GET)
            .path(path("collections/RCMImageProducts"))
            .query_param("format", "json");
        then.status(200).json_body(rcm_fields_body());
    });
    (collections, fields)
}

pub fn order_item(item_id: u64, order_id: u64, record_id: u64, status: &str) -> Value {
    json!({
        "itemId": item_id,
        "orderId": order_id,
        "recordId": record_id,
        "collectionId": "RCMImageProducts",
        "status": status,
        "dateSubmitted": "2024-05-01T12:00:00Z",
        "parameters": {"packagingFormat": "ZIP"}
    })
}
