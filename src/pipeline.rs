use crate::concurrency::map_sources_limited;
use crate::config::{BatchLimit, IngestOptions};
use crate::envelope::{EnvelopeFormatter, GMetaEntry};
use crate::error::{MdfError, Result};
use crate::feedstock::FeedstockReader;
use crate::json_utils::{acl_list, landing_page};
use crate::namespace::NamespaceMapper;
use crate::paths::{discover_feedstocks, feedstock_path, is_valid_source_name, FeedstockJob};
use crate::progress::{total_feedstock_size, ProgressScope};
use crate::search::{Ingest, SearchClient};
use crate::util::init_tracing_once;
use crate::validator::Validator;
use anyhow::anyhow;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Which feedstocks a drive covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSelection {
    One(String),
    Many(Vec<String>),
    /// Every `*_all.json` in the feedstock directory.
    All,
}

impl SourceSelection {
    pub fn many<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SourceSelection::Many(names.into_iter().map(Into::into).collect())
    }
}

/// Outcome of ingesting one feedstock. On failure the counts are what was
/// accepted by the remote service before the error.
#[derive(Debug)]
pub struct IngestReport {
    pub source_name: String,
    pub records_ingested: u64,
    pub batches_sent: u64,
    pub error: Option<MdfError>,
}

impl IngestReport {
    fn new(source_name: &str) -> Self {
        Self { source_name: source_name.to_string(), records_ingested: 0, batches_sent: 0, error: None }
    }

    pub fn ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Default)]
pub struct DriveSummary {
    pub reports: Vec<IngestReport>,
}

impl DriveSummary {
    pub fn ok(&self) -> bool {
        self.reports.iter().all(IngestReport::ok)
    }

    pub fn records_ingested(&self) -> u64 {
        self.reports.iter().map(|r| r.records_ingested).sum()
    }

    pub fn batches_sent(&self) -> u64 {
        self.reports.iter().map(|r| r.batches_sent).sum()
    }

    pub fn failed(&self) -> impl Iterator<Item = &IngestReport> {
        self.reports.iter().filter(|r| !r.ok())
    }
}

#[derive(Clone, Default)]
pub struct MdfPipeline {
    pub(crate) opts: IngestOptions,
}

impl MdfPipeline {
    pub fn new() -> Self {
        Self { opts: IngestOptions::default() }
    }

    pub fn from_options(opts: IngestOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &IngestOptions {
        &self.opts
    }

    // -------- Builder methods --------
    pub fn feedstock_dir(mut self, dir: impl AsRef<Path>) -> Self { self.opts = self.opts.with_feedstock_dir(dir); self }
    pub fn search_base_url(mut self, url: impl Into<String>) -> Self { self.opts = self.opts.with_search_base_url(url); self }
    pub fn index(mut self, index: impl Into<String>) -> Self { self.opts = self.opts.with_default_index(Some(index.into())); self }
    pub fn credential_file(mut self, path: impl AsRef<Path>) -> Self { self.opts = self.opts.with_credential_file(path); self }
    pub fn http_timeout(mut self, timeout: Duration) -> Self { self.opts = self.opts.with_http_timeout(timeout); self }
    pub fn batch_size(mut self, limit: BatchLimit) -> Self { self.opts = self.opts.with_batch_size(limit); self }
    pub fn verbose(mut self, yes: bool) -> Self { self.opts = self.opts.with_verbose(yes); self }
    pub fn source_concurrency(mut self, n: usize) -> Self { self.opts = self.opts.with_source_concurrency(n); self }
    pub fn strict(mut self, yes: bool) -> Self { self.opts = self.opts.with_strict(yes); self }
    pub fn community(mut self, community: impl Into<String>) -> Self { self.opts = self.opts.with_community(community); self }
    pub fn io_buffers(mut self, read_bytes: usize, write_bytes: usize) -> Self { self.opts = self.opts.with_io_buffers(read_bytes, write_bytes); self }

    /// A fresh validator writing into this pipeline's feedstock directory.
    pub fn validator(&self) -> Result<Validator> {
        Validator::new(&self.opts)
    }

    pub fn search_client(&self) -> Result<SearchClient> {
        SearchClient::from_options(&self.opts)
    }

    /// Ingest the selected feedstocks through the configured search service.
    pub fn drive(&self, selection: SourceSelection) -> Result<DriveSummary> {
        init_tracing_once();
        let client = self.search_client()?;
        Ok(self.drive_with(&client, selection))
    }

    /// Ingest the selected feedstocks through `sink`. A failing source never
    /// stops the others.
    pub fn drive_with<I: Ingest>(&self, sink: &I, selection: SourceSelection) -> DriveSummary {
        let jobs = self.plan(selection);
        if jobs.is_empty() {
            tracing::warn!("no feedstocks selected under {}", self.opts.feedstock_dir.display());
        } else {
            tracing::info!(
                "driving {} source(s), {} bytes of feedstock",
                jobs.len(),
                total_feedstock_size(&jobs)
            );
        }

        let reports = map_sources_limited(&jobs, self.opts.source_concurrency, |job| {
            self.ingest_job(job, sink)
        });
        let summary = DriveSummary { reports };
        tracing::info!(
            records = summary.records_ingested(),
            batches = summary.batches_sent(),
            failed = summary.failed().count(),
            "drive finished"
        );
        summary
    }

    /// Stream one feedstock into `sink` in batches of `batch_size`.
    pub fn ingest_source<I: Ingest>(&self, source_name: &str, sink: &I) -> IngestReport {
        let job = FeedstockJob {
            source_name: source_name.to_string(),
            path: feedstock_path(&self.opts.feedstock_dir, source_name),
        };
        self.ingest_job(&job, sink)
    }

    fn plan(&self, selection: SourceSelection) -> Vec<FeedstockJob> {
        let dir = &self.opts.feedstock_dir;
        let job = |name: String| FeedstockJob { path: feedstock_path(dir, &name), source_name: name };
        match selection {
            SourceSelection::One(name) => vec![job(name)],
            SourceSelection::Many(names) => names.into_iter().map(job).collect(),
            SourceSelection::All => discover_feedstocks(dir),
        }
    }

    fn ingest_job<I: Ingest>(&self, job: &FeedstockJob, sink: &I) -> IngestReport {
        let mut report = IngestReport::new(&job.source_name);
        let progress = if self.opts.verbose {
            let total = fs::metadata(&job.path).map(|m| m.len()).unwrap_or(0);
            ProgressScope::bytes(job.source_name.clone(), total)
        } else {
            ProgressScope::hidden()
        };

        if let Err(e) = self.stream_job(job, sink, &mut report, &progress) {
            tracing::error!(
                source_name = %job.source_name,
                records = report.records_ingested,
                batches = report.batches_sent,
                "ingest failed: {e}"
            );
            progress.finish(format!("{}: failed after {} records", job.source_name, report.records_ingested));
            report.error = Some(e);
            return report;
        }

        progress.finish(format!("{}: {} records", job.source_name, report.records_ingested));
        tracing::info!(
            source_name = %job.source_name,
            records = report.records_ingested,
            batches = report.batches_sent,
            "ingested"
        );
        report
    }

    fn stream_job<I: Ingest>(
        &self,
        job: &FeedstockJob,
        sink: &I,
        report: &mut IngestReport,
        progress: &ProgressScope,
    ) -> Result<()> {
        if !is_valid_source_name(&job.source_name) {
            return Err(MdfError::config(format!("'{}' is not a valid source name", job.source_name)));
        }
        let mut rdr = FeedstockReader::open(&job.path, self.opts.read_buffer_bytes)?;
        let mapper = NamespaceMapper::new();
        let formatter = EnvelopeFormatter::new(self.opts.gmeta_version.clone(), self.opts.community.clone());
        let index = self.opts.default_index.as_deref();

        let header = rdr
            .next_value()?
            .ok_or_else(|| MdfError::Other(anyhow!("{} has no dataset header", job.path.display())))?;
        let dataset_acl = acl_list(&header);

        let mut batch: Vec<GMetaEntry> = Vec::new();
        let mut last_bytes = rdr.bytes_read();
        progress.inc_bytes(last_bytes);

        while let Some(record) = rdr.next_value()? {
            let entry = to_entry(record, dataset_acl.as_deref(), &mapper, &formatter)
                .map_err(|e| line_context(e, &job.path, rdr.line_no()))?;
            batch.push(entry);

            let now = rdr.bytes_read();
            progress.inc_bytes(now - last_bytes);
            last_bytes = now;

            if self.opts.batch_size.is_full(batch.len()) {
                flush(&formatter, sink, index, &mut batch, report)?;
            }
        }
        if !batch.is_empty() {
            flush(&formatter, sink, index, &mut batch, report)?;
        }
        Ok(())
    }
}

/// Subject from the landing page, ACL from the record or else the dataset,
/// every other key namespaced.
fn to_entry(
    record: Value,
    dataset_acl: Option<&[String]>,
    mapper: &NamespaceMapper,
    formatter: &EnvelopeFormatter,
) -> Result<GMetaEntry> {
    let subject = landing_page(&record)
        .map(str::to_string)
        .ok_or_else(|| MdfError::invalid_envelope("record has no links.landing_page"))?;
    let acl = acl_list(&record)
        .or_else(|| dataset_acl.map(<[String]>::to_vec))
        .ok_or_else(|| MdfError::invalid_envelope(format!("no acl for {subject} in record or dataset")))?;

    let mut body = record;
    if let Value::Object(map) = &mut body {
        map.remove("acl");
    }
    let mut content = match mapper.add_namespace(&body) {
        Value::Object(map) => map,
        _ => return Err(MdfError::invalid_envelope(format!("record {subject} is not an object"))),
    };
    content.insert("subject".into(), Value::String(subject));
    content.insert("acl".into(), Value::Array(acl.into_iter().map(Value::String).collect()));
    formatter.format_entry(Value::Object(content))
}

fn flush<I: Ingest>(
    formatter: &EnvelopeFormatter,
    sink: &I,
    index: Option<&str>,
    batch: &mut Vec<GMetaEntry>,
    report: &mut IngestReport,
) -> Result<()> {
    let list = formatter.format_list(std::mem::take(batch));
    let n = list.len() as u64;
    let body = list.to_value()?;
    sink.ingest(&body, index)?;
    report.records_ingested += n;
    report.batches_sent += 1;
    tracing::debug!(source_name = %report.source_name, entries = n, "batch ingested");
    Ok(())
}

fn line_context(e: MdfError, path: &Path, line: u64) -> MdfError {
    match e {
        MdfError::InvalidEnvelope(msg) => MdfError::InvalidEnvelope(format!("{} line {line}: {msg}", path.display())),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        bodies: Mutex<Vec<Value>>,
    }

    impl Ingest for Recorder {
        fn ingest(&self, body: &Value, _index: Option<&str>) -> Result<Value> {
            self.bodies.lock().push(body.clone());
            Ok(json!({"success": true}))
        }
    }

    #[test]
    fn record_acl_wins_over_dataset_acl() {
        let mapper = NamespaceMapper::new();
        let fmt = EnvelopeFormatter::default();
        let dataset = vec!["public".to_string()];

        let own = json!({"title": "a", "acl": ["g1"], "links": {"landing_page": "http://x/a"}});
        let e = to_entry(own, Some(&dataset), &mapper, &fmt).unwrap();
        assert_eq!(e.visible_to, vec!["g1"]);
        assert_eq!(e.subject, "http://x/a");

        let inherited = json!({"title": "b", "links": {"landing_page": "http://x/b"}});
        let e = to_entry(inherited, Some(&dataset), &mapper, &fmt).unwrap();
        assert_eq!(e.visible_to, vec!["public"]);
        assert!(e.content.keys().all(|k| k.contains('#') || k.starts_with("http")));
    }

    #[test]
    fn records_without_landing_page_cannot_be_enveloped() {
        let err = to_entry(json!({"title": "x"}), None, &NamespaceMapper::new(), &EnvelopeFormatter::default())
            .unwrap_err();
        assert!(matches!(err, MdfError::InvalidEnvelope(_)));
    }

    #[test]
    fn missing_feedstock_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Recorder::default();
        let summary = MdfPipeline::new()
            .feedstock_dir(dir.path())
            .drive_with(&sink, SourceSelection::many(["absent", "../bad"]));
        assert_eq!(summary.reports.len(), 2);
        assert!(summary.reports.iter().all(|r| r.error.is_some()));
        assert!(sink.bodies.lock().is_empty());
        assert!(!summary.ok());
    }
}
