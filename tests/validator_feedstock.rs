#[path = "common/mod.rs"]
mod common;

use common::*;
use mdf_ingest::{feedstock_path, MdfError, Validator, ValidatorState, VALIDATOR_VERSION};
use serde_json::json;
use std::fs;

/// Header plus one record gives a two-line feedstock with identifiers filled in.
#[test]
fn minimal_dataset_writes_two_lines() {
    let dir = tempfile::tempdir().unwrap();
    let (mut v, started) = Validator::construct(dataset_header("s1"), &options(dir.path())).unwrap();
    assert!(started.warnings.is_empty());
    assert_eq!(started.feedstock, dir.path().join("s1_all.json"));

    let out = v.write_record(json!({"title": "R1", "links": {"landing_page": "http://x/1/r1"}})).unwrap();
    assert!(out.success);
    let path = v.close().unwrap();
    assert_eq!(v.state(), ValidatorState::Closed);

    let lines = read_jsonl_values(&path);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["source_id"], json!(started.source_id));
    assert_eq!(lines[0]["mdf_validator_version"], json!(VALIDATOR_VERSION));
    assert_eq!(lines[1]["mdf_id"], json!(out.mdf_id.unwrap()));
    assert_eq!(lines[1]["parent_id"], json!(started.source_id));
}

/// Every accepted record lands in order, keeps its fields and points at the header.
#[test]
fn feedstock_has_n_plus_one_lines_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_feedstock(dir.path(), "ordered", 40);
    let lines = read_jsonl_values(&path);
    assert_eq!(lines.len(), 41);

    let header = dataset_header("ordered");
    for (k, v) in header.as_object().unwrap() {
        assert_eq!(&lines[0][k], v, "header field {k}");
    }
    let source_id = lines[0]["source_id"].as_str().unwrap();
    for (i, line) in lines[1..].iter().enumerate() {
        let expected = record(i + 1);
        assert_eq!(line["title"], expected["title"]);
        assert_eq!(line["links"], expected["links"]);
        assert_eq!(line["parent_id"], json!(source_id));
    }
}

#[test]
fn strict_mode_rejects_missing_citation() {
    let dir = tempfile::tempdir().unwrap();
    let mut header = dataset_header("s1");
    header.as_object_mut().unwrap().remove("citation");

    let strict = options(dir.path()).with_strict(true);
    match Validator::construct(header.clone(), &strict) {
        Err(e @ MdfError::Schema { .. }) => assert_eq!(e.issue_paths(), vec!["citation"]),
        Err(e) => panic!("unexpected error {e}"),
        Ok(_) => panic!("strict construction must fail"),
    }
    assert!(!feedstock_path(dir.path(), "s1").exists());

    let (mut v, started) = Validator::construct(header, &options(dir.path())).unwrap();
    let paths: Vec<&str> = started.warnings.iter().map(|w| w.path.as_str()).collect();
    assert_eq!(paths, vec!["citation"]);
    v.close().unwrap();
}

#[test]
fn invalid_header_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut header = dataset_header("broken");
    header["acl"] = json!([]);
    header.as_object_mut().unwrap().remove("title");

    let err = Validator::construct(header, &options(dir.path())).err().unwrap();
    let mut paths = err.issue_paths();
    paths.sort();
    assert_eq!(paths, vec!["acl", "title"]);
    assert!(err.to_string().contains("title"));
    assert_eq!(fs::read_dir(dir.path()).map(|d| d.count()).unwrap_or(0), 0);
}

#[test]
fn double_open_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let (mut first, _) = Validator::construct(dataset_header("dup"), &options(dir.path())).unwrap();
    match Validator::construct(dataset_header("dup"), &options(dir.path())) {
        Err(MdfError::AlreadyOpen { source_name, .. }) => assert_eq!(source_name, "dup"),
        Err(e) => panic!("unexpected error {e}"),
        Ok(_) => panic!("second validator must not open the same feedstock"),
    }
    first.close().unwrap();
}

#[test]
fn cancel_removes_partial_feedstock() {
    let dir = tempfile::tempdir().unwrap();
    let (mut v, started) = Validator::construct(dataset_header("cancelled"), &options(dir.path())).unwrap();
    v.write_record(record(1)).unwrap();
    assert!(started.feedstock.exists());

    v.cancel_validation().unwrap();
    assert_eq!(v.state(), ValidatorState::Closed);
    assert!(!started.feedstock.exists());
    assert!(matches!(v.write_record(record(2)), Err(MdfError::ValidatorClosed)));

    // Lock released: the source can be validated again.
    write_feedstock(dir.path(), "cancelled", 1);
}

#[test]
fn empty_record_stream_gives_header_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_feedstock(dir.path(), "empty", 0);
    assert_eq!(read_jsonl_values(&path).len(), 1);
}

#[test]
fn internal_fields_cannot_be_supplied() {
    let dir = tempfile::tempdir().unwrap();
    let (mut v, _) = Validator::construct(dataset_header("forged"), &options(dir.path())).unwrap();
    let mut r = record(1);
    r["parent_id"] = json!("someone-else");
    let out = v.write_record(r).unwrap();
    assert!(!out.success);
    assert_eq!(out.errors[0].path, "parent_id");
    v.close().unwrap();
}
