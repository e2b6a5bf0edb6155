mod common;

use common::*;
use eodms_rapi::{DownloadOptions, OrderItem, RapiError, RemoteFile};
use httpmock::prelude::*;
use httpmock::Method::HEAD;
use serde_json::{Value, json};
use std::time::Duration;
use tempfile::TempDir;

fn submitted(item_id: u64, order_id: u64, record_id: u64) -> OrderItem {
    serde_json::from_value(order_item(item_id, order_id, record_id, "SUBMITTED")).unwrap()
}

fn available(server: &MockServer, item_id: u64, order_id: u64, record_id: u64, file: &str, size: u64) -> Value {
    let url = server.url(format!("/data/{}", file));
    let mut item = order_item(item_id, order_id, record_id, "AVAILABLE_FOR_DOWNLOAD");
    item["destinations"] = json!([{
        "type": "FTP",
        "stringValue": format!("<a href=\"{url}\" target=\"_blank\">{url}</a></br>")
    }]);
    item["manifest"] = json!({ format!("{}/{}", record_id, file): size.to_string() });
    item
}

fn fast(max_attempts: usize) -> DownloadOptions {
    DownloadOptions {
        wait: Duration::ZERO,
        max_attempts: Some(max_attempts),
        timeout: None,
        show_progress: false,
    }
}

#[test]
fn available_items_are_downloaded() {
    let server = MockServer::start();
    let mut failed = order_item(2, 50975, 101, "FAILED");
    failed["statusMessage"] = json!("Processing error");
    let order = server.mock(|when, then| {
        when.method(GET)
            .path(path("order"))
            .query_param("orderId", "50975");
        then.status(200).json_body(json!({"items": [
            available(&server, 1, 50975, 100, "RCM1_100.zip", 11),
            failed
        ]}));
    });
    let file = server.mock(|when, then| {
        when.method(GET).path("/data/RCM1_100.zip");
        then.status(200).body("hello world");
    });

    let dir = TempDir::new().unwrap();
    let items = vec![submitted(1, 50975, 100), submitted(2, 50975, 101)];
    let done = client(&server).download(&items, dir.path(), &fast(3)).unwrap();

    order.assert_hits(1);
    file.assert_hits(1);
    assert_eq!(done.len(), 2);

    let ok = done.iter().find(|d| d.item.item_id == "1").unwrap();
    assert!(ok.downloaded);
    assert_eq!(ok.download_paths.len(), 1);
    assert!(ok.download_paths[0].url.ends_with("/data/RCM1_100.zip"));
    let local = dir.path().join("RCM1_100.zip");
    assert_eq!(std::fs::read_to_string(&local).unwrap(), "hello world");

    let bad = done.iter().find(|d| d.item.item_id == "2").unwrap();
    assert!(!bad.downloaded);
    assert!(bad.download_paths.is_empty());
}

#[test]
fn complete_local_files_are_not_fetched_again() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path(path("order"));
        then.status(200).json_body(json!({"items": [
            available(&server, 1, 7, 100, "RCM1_100.zip", 5)
        ]}));
    });
    let file = server.mock(|when, then| {
        when.method(GET).path("/data/RCM1_100.zip");
        then.status(200).body("fresh");
    });

    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("RCM1_100.zip"), "local").unwrap();

    let done = client(&server)
        .download(&[submitted(1, 7, 100)], dir.path(), &fast(1))
        .unwrap();
    assert!(done[0].downloaded);
    file.assert_hits(0);
    assert_eq!(std::fs::read_to_string(dir.path().join("RCM1_100.zip")).unwrap(), "local");
}

#[test]
fn polling_stops_when_attempts_run_out() {
    let server = MockServer::start();
    let order = server.mock(|when, then| {
        when.method(GET).path(path("order"));
        then.status(200)
            .json_body(json!({"items": [order_item(1, 7, 100, "PROCESSING")]}));
    });

    let dir = TempDir::new().unwrap();
    let err = client(&server)
        .download(&[submitted(1, 7, 100)], dir.path(), &fast(2))
        .unwrap_err();

    order.assert_hits(2);
    match err.downcast_ref::<RapiError>() {
        Some(RapiError::AttemptsExhausted {
            attempts,
            completed,
            pending,
        }) => {
            assert_eq!(*attempts, 2);
            assert_eq!(*completed, 0);
            assert_eq!(pending, &vec!["1".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn polling_stops_when_time_runs_out() {
    let server = MockServer::start();
    let order = server.mock(|when, then| {
        when.method(GET).path(path("order"));
        then.status(200)
            .json_body(json!({"items": [order_item(1, 7, 100, "PROCESSING")]}));
    });

    let opts = DownloadOptions {
        wait: Duration::from_millis(30),
        max_attempts: None,
        timeout: Some(Duration::from_millis(100)),
        show_progress: false,
    };
    let dir = TempDir::new().unwrap();
    let err = client(&server)
        .download(&[submitted(1, 7, 100)], dir.path(), &opts)
        .unwrap_err();

    match err.downcast_ref::<RapiError>() {
        Some(RapiError::AttemptsExhausted {
            attempts,
            completed,
            pending,
        }) => {
            assert_eq!(order.hits(), *attempts);
            assert_eq!(*completed, 0);
            assert_eq!(pending, &vec!["1".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn value_added_items_are_matched_by_parent() {
    let server = MockServer::start();
    let mut child = available(&server, 9, 7, 100, "RCM1_100_vap.zip", 3);
    child["parameters"] = json!({"ParentItemId": 1, "Vap_Request_UUID": "abc"});
    server.mock(|when, then| {
        when.method(GET).path(path("order"));
        then.status(200).json_body(json!({"items": [child]}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/data/RCM1_100_vap.zip");
        then.status(200).body("vap");
    });

    let dir = TempDir::new().unwrap();
    let done = client(&server)
        .download(&[submitted(1, 7, 100)], dir.path(), &fast(1))
        .unwrap();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].item.item_id, "9");
    assert!(dir.path().join("RCM1_100_vap.zip").exists());
}

#[test]
fn nothing_to_download() {
    let server = MockServer::start();
    let dir = TempDir::new().unwrap();
    let done = client(&server).download(&[], dir.path(), &fast(1)).unwrap();
    assert!(done.is_empty());
}

#[test]
fn folder_destinations_are_walked() {
    let server = MockServer::start();
    let item = available(&server, 1, 7, 100, "RCM1_folder", 0);
    server.mock(|when, then| {
        when.method(GET).path(path("order"));
        then.status(200).json_body(json!({"items": [item]}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/data/RCM1_folder/");
        then.status(200).body(
            r#"<html><a href="/data/">Parent</a><a href="/data/RCM1_folder/a.tif">a.tif</a><a href="/data/RCM1_folder/sub/">sub</a></html>"#,
        );
    });
    server.mock(|when, then| {
        when.method(HEAD).path("/data/RCM1_folder/a.tif");
        then.status(200);
    });
    server.mock(|when, then| {
        when.method(GET).path("/data/RCM1_folder/a.tif");
        then.status(200).body("tif");
    });
    server.mock(|when, then| {
        when.method(HEAD).path("/data/RCM1_folder/sub");
        then.status(200).header("Entry-Type", "Directory");
    });
    server.mock(|when, then| {
        when.method(GET).path("/data/RCM1_folder/sub/");
        then.status(200)
            .body(r#"<html><a href="/data/RCM1_folder/">up</a><a href="b.txt">b.txt</a></html>"#);
    });
    server.mock(|when, then| {
        when.method(HEAD).path("/data/RCM1_folder/sub/b.txt");
        then.status(200);
    });
    server.mock(|when, then| {
        when.method(GET).path("/data/RCM1_folder/sub/b.txt");
        then.status(200).body("b");
    });

    let dir = TempDir::new().unwrap();
    let done = client(&server)
        .download(&[submitted(1, 7, 100)], dir.path(), &fast(1))
        .unwrap();

    assert!(done[0].downloaded);
    let root = dir.path().join("RCM1_folder");
    assert_eq!(std::fs::read_to_string(root.join("a.tif")).unwrap(), "tif");
    assert_eq!(std::fs::read_to_string(root.join("sub").join("b.txt")).unwrap(), "b");
}

fn remote(server: &MockServer, file: &str, size: u64) -> RemoteFile {
    RemoteFile {
        location: server.url(format!("/data/{}", file)),
        content_length: size,
        content_type: None,
    }
}

#[test]
fn partial_file_is_resumed() {
    let server = MockServer::start();
    let rest = server.mock(|when, then| {
        when.method(GET)
            .path("/data/RCM1_100.zip")
            .header("range", "bytes=4-");
        then.status(206).body("EFGH");
    });

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("RCM1_100.zip");
    std::fs::write(&target, "ABCD").unwrap();

    client(&server)
        .download_file(&remote(&server, "RCM1_100.zip", 8), &target)
        .unwrap();
    rest.assert_hits(1);
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "ABCDEFGH");
}

#[test]
fn whole_file_replaces_partial_when_range_is_ignored() {
    let server = MockServer::start();
    let whole = server.mock(|when, then| {
        when.method(GET).path("/data/RCM1_100.zip");
        then.status(200).body("ABCDEFGH");
    });

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("RCM1_100.zip");
    std::fs::write(&target, "ABCD").unwrap();

    client(&server)
        .download_file(&remote(&server, "RCM1_100.zip", 8), &target)
        .unwrap();
    whole.assert_hits(1);
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "ABCDEFGH");
}

#[test]
fn short_read_continues_from_local_length() {
    let server = MockServer::start();
    let rest = server.mock(|when, then| {
        when.method(GET)
            .path("/data/RCM1_100.zip")
            .header("range", "bytes=4-");
        then.status(206).body("EFGH");
    });
    let first = server.mock(|when, then| {
        when.method(GET)
            .path("/data/RCM1_100.zip")
            .matches(|req| {
                !req.headers
                    .iter()
                    .flatten()
                    .any(|(name, _)| name.eq_ignore_ascii_case("range"))
            });
        then.status(200).body("ABCD");
    });

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("RCM1_100.zip");
    client(&server)
        .download_file(&remote(&server, "RCM1_100.zip", 8), &target)
        .unwrap();

    first.assert_hits(1);
    rest.assert_hits(1);
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "ABCDEFGH");
}
