#![allow(dead_code)]

use mdf_ingest::{IngestOptions, Ingest, MdfError, Result, Validator};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Header that passes the dataset schema with no warnings.
pub fn dataset_header(source_name: &str) -> Value {
    json!({
        "title": "T",
        "acl": ["public"],
        "source_name": source_name,
        "data_contact": {"given_name": "Ada", "family_name": "Lovelace", "email": "ada@example.org"},
        "citation": ["c"],
        "links": {"landing_page": "http://x/1"},
        "data_contributor": [{"given_name": "Alan", "family_name": "Turing", "email": "alan@example.org"}]
    })
}

/// Minimal valid record; the landing page is unique per `i`.
pub fn record(i: usize) -> Value {
    json!({"title": format!("R{i}"), "links": {"landing_page": format!("http://x/1/r{i}")}})
}

pub fn options(dir: &Path) -> IngestOptions {
    IngestOptions::default().with_feedstock_dir(dir)
}

/// Validate `n` records for `source_name` into `dir` and return the feedstock path.
pub fn write_feedstock(dir: &Path, source_name: &str, n: usize) -> PathBuf {
    let (mut v, _) = Validator::construct(dataset_header(source_name), &options(dir)).unwrap();
    for i in 1..=n {
        assert!(v.write_record(record(i)).unwrap().success);
    }
    v.close().unwrap()
}

/// Read a feedstock into values (skips empty lines).
pub fn read_jsonl_values(path: &Path) -> Vec<Value> {
    let f = File::open(path).unwrap();
    BufReader::new(f)
        .lines()
        .map(|l| l.unwrap())
        .filter(|s| !s.is_empty())
        .map(|s| serde_json::from_str(&s).unwrap())
        .collect()
}

/// In-process ingest sink. Records every body; optionally fails one call (1-based)
/// with a remote 503.
#[derive(Default)]
pub struct RecordingIngest {
    pub bodies: Mutex<Vec<Value>>,
    pub fail_on_call: Option<usize>,
    calls: Mutex<usize>,
}

impl RecordingIngest {
    pub fn failing_on(call: usize) -> Self {
        Self { fail_on_call: Some(call), ..Default::default() }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }

    /// Entry count of each accepted body, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.bodies.lock().iter().map(|b| gmeta(b).len()).collect()
    }

    /// Every subject accepted so far, in order.
    pub fn subjects(&self) -> Vec<String> {
        self.bodies
            .lock()
            .iter()
            .flat_map(|b| gmeta(b).iter().map(|e| e["subject"].as_str().unwrap().to_string()).collect::<Vec<_>>())
            .collect()
    }
}

impl Ingest for RecordingIngest {
    fn ingest(&self, body: &Value, _index: Option<&str>) -> Result<Value> {
        let call = {
            let mut c = self.calls.lock();
            *c += 1;
            *c
        };
        if self.fail_on_call == Some(call) {
            return Err(MdfError::remote(Some(503), "service unavailable"));
        }
        self.bodies.lock().push(body.clone());
        Ok(json!({"success": true, "num_documents_ingested": gmeta(body).len()}))
    }
}

pub fn gmeta(body: &Value) -> &Vec<Value> {
    body["ingest_data"]["gmeta"].as_array().unwrap()
}
