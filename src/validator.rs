//! The feedstock writer: accepts one dataset header, then any number of records,
//! validating each against the schema before it reaches the file.
//!
//! States: `Init` (no header yet) → `Open` (header written) → `Closed` (terminal).
//! Rejected records are reported and never written; the validator stays `Open`.
//! An I/O failure closes the validator and leaves the partial feedstock in place.

use crate::config::IngestOptions;
use crate::error::{MdfError, Result};
use crate::feedstock::FeedstockWriter;
use crate::ident::IdMinter;
use crate::json_utils::{acl_of, landing_page, source_name};
use crate::paths::{feedstock_path, is_valid_source_name};
use crate::schema::{FieldIssue, SchemaKind, SchemaRegistry, ValidationReport};
use ahash::RandomState;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Stamped into every feedstock header.
pub const VALIDATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const PUBLIC_ACL: &str = "public";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidatorState {
    Init,
    Open,
    Closed,
}

#[derive(Clone, Debug, Serialize)]
pub struct DatasetOutcome {
    pub source_id: String,
    pub feedstock: PathBuf,
    pub warnings: Vec<FieldIssue>,
}

/// Result of `write_record`. Rejections are data, not errors.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RecordOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mdf_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<FieldIssue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_metadata: Option<Value>,
}

impl DatasetOutcome {
    /// Fails with `MetadataWarning` when the header drew any warning.
    pub fn deny_warnings(&self) -> Result<()> {
        deny(&self.warnings)
    }
}

impl RecordOutcome {
    /// Fails with `MetadataWarning` when an accepted record drew any warning.
    pub fn deny_warnings(&self) -> Result<()> {
        deny(&self.warnings)
    }
}

fn deny(warnings: &[FieldIssue]) -> Result<()> {
    if warnings.is_empty() {
        return Ok(());
    }
    Err(MdfError::MetadataWarning { issues: warnings.to_vec() })
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct BatchOutcome {
    pub success: bool,
    pub accepted: usize,
    pub rejected: usize,
    pub outcomes: Vec<RecordOutcome>,
}

pub struct Validator {
    state: ValidatorState,
    registry: Arc<SchemaRegistry>,
    minter: &'static IdMinter,
    feedstock_dir: PathBuf,
    strict: bool,
    write_buffer_bytes: usize,

    writer: Option<FeedstockWriter>,
    source_name: Option<String>,
    source_id: Option<String>,
    landing_pages: HashSet<String, RandomState>,
    accepted: u64,
    rejected: u64,
}

impl Validator {
    /// A validator in `Init`, with the schema version named by `opts`.
    pub fn new(opts: &IngestOptions) -> Result<Self> {
        let registry = match &opts.schema_dir {
            Some(dir) => SchemaRegistry::from_dir(dir, &opts.schema_version)?,
            None => SchemaRegistry::load(&opts.schema_version)?,
        };
        Self::with_registry(opts, Arc::new(registry))
    }

    /// Share one compiled registry across many validators.
    pub fn with_registry(opts: &IngestOptions, registry: Arc<SchemaRegistry>) -> Result<Self> {
        Ok(Self {
            state: ValidatorState::Init,
            registry,
            minter: IdMinter::global()?,
            feedstock_dir: opts.feedstock_dir.clone(),
            strict: opts.strict,
            write_buffer_bytes: opts.write_buffer_bytes,
            writer: None,
            source_name: None,
            source_id: None,
            landing_pages: HashSet::default(),
            accepted: 0,
            rejected: 0,
        })
    }

    /// `new` followed by `start_dataset`.
    pub fn construct(header: Value, opts: &IngestOptions) -> Result<(Self, DatasetOutcome)> {
        let mut v = Self::new(opts)?;
        let outcome = v.start_dataset(header)?;
        Ok((v, outcome))
    }

    pub fn state(&self) -> ValidatorState {
        self.state
    }

    pub fn source_name(&self) -> Option<&str> {
        self.source_name.as_deref()
    }

    pub fn source_id(&self) -> Option<&str> {
        self.source_id.as_deref()
    }

    pub fn feedstock_path(&self) -> Option<PathBuf> {
        self.source_name.as_deref().map(|s| feedstock_path(&self.feedstock_dir, s))
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Validate the header, claim the feedstock and write line 1. Nothing is
    /// created on disk unless validation passes.
    pub fn start_dataset(&mut self, header: Value) -> Result<DatasetOutcome> {
        match self.state {
            ValidatorState::Closed => return Err(MdfError::ValidatorClosed),
            ValidatorState::Open => {
                return Err(MdfError::DatasetAlreadyStarted(self.source_name.clone().unwrap_or_default()))
            }
            ValidatorState::Init => {}
        }

        let mut report = self.registry.validate(&header, SchemaKind::Dataset);
        check_acl(acl_of(&header), &mut report);
        let source_name = source_name(&header).unwrap_or("").to_string();
        if !source_name.is_empty() && !is_valid_source_name(&source_name) {
            report.errors.push(
                FieldIssue::new("source_name", "must contain only letters, digits, '.', '_' or '-'")
                    .with_value(&header["source_name"]),
            );
        }
        if self.strict {
            report = report.promote_warnings();
        }
        if !report.ok() {
            tracing::warn!(source_name = %source_name, "dataset header rejected: {} error(s)", report.errors.len());
            return Err(MdfError::Schema { issues: report.errors });
        }

        let source_id = self.minter.next_id();
        let mut writer = FeedstockWriter::create(&self.feedstock_dir, &source_name, self.write_buffer_bytes)?;

        let mut line = into_object(header);
        line.insert("source_id".into(), Value::String(source_id.clone()));
        line.insert("mdf_validator_version".into(), Value::String(VALIDATOR_VERSION.into()));

        let written = writer.write_value(&Value::Object(line));
        let feedstock = writer.path().to_path_buf();
        self.source_name = Some(source_name);
        self.source_id = Some(source_id.clone());
        if let Err(e) = written {
            self.state = ValidatorState::Closed;
            tracing::error!("writing dataset header to {} failed: {e}", feedstock.display());
            return Err(e);
        }
        self.writer = Some(writer);
        self.state = ValidatorState::Open;

        for w in &report.warnings {
            tracing::debug!("dataset warning: {w}");
        }
        tracing::info!(source_id = %source_id, "opened feedstock {}", feedstock.display());
        Ok(DatasetOutcome { source_id, feedstock, warnings: report.warnings })
    }

    /// Validate and append one record.
    pub fn write_record(&mut self, record: Value) -> Result<RecordOutcome> {
        match self.state {
            ValidatorState::Closed => return Err(MdfError::ValidatorClosed),
            ValidatorState::Init => return Err(MdfError::DatasetNotStarted),
            ValidatorState::Open => {}
        }

        let mut report = self.registry.validate(&record, SchemaKind::Record);
        check_acl(acl_of(&record), &mut report);
        let page = landing_page(&record).map(str::to_string);
        if let Some(p) = &page {
            if self.landing_pages.contains(p) {
                report.warnings.push(
                    FieldIssue::new("links.landing_page", "duplicates the landing page of an earlier record")
                        .with_value(&Value::String(p.clone())),
                );
            }
        }
        if self.strict {
            report = report.promote_warnings();
        }

        if !report.ok() {
            self.rejected += 1;
            let message = format!(
                "record rejected: {}",
                report.errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
            );
            tracing::debug!("{message}");
            return Ok(RecordOutcome {
                success: false,
                mdf_id: None,
                message: Some(message),
                warnings: report.warnings,
                errors: report.errors,
                invalid_metadata: Some(record),
            });
        }

        let mdf_id = self.minter.next_id();
        let mut line = into_object(record);
        line.insert("mdf_id".into(), Value::String(mdf_id.clone()));
        line.insert("parent_id".into(), Value::String(self.source_id.clone().unwrap_or_default()));

        let Some(writer) = self.writer.as_mut() else {
            self.state = ValidatorState::Closed;
            return Err(MdfError::ValidatorClosed);
        };
        if let Err(e) = writer.write_value(&Value::Object(line)) {
            self.fail_io();
            return Err(e);
        }

        self.accepted += 1;
        if let Some(p) = page {
            self.landing_pages.insert(p);
        }
        Ok(RecordOutcome { success: true, mdf_id: Some(mdf_id), warnings: report.warnings, ..Default::default() })
    }

    /// Write every record; rejected records are counted, not fatal.
    pub fn write_dataset<I>(&mut self, records: I) -> Result<BatchOutcome>
    where
        I: IntoIterator<Item = Value>,
    {
        let mut batch = BatchOutcome::default();
        for record in records {
            let outcome = self.write_record(record)?;
            if outcome.success {
                batch.accepted += 1;
            } else {
                batch.rejected += 1;
            }
            batch.outcomes.push(outcome);
        }
        batch.success = batch.rejected == 0;
        Ok(batch)
    }

    /// Abandon the dataset: delete the partial feedstock and release the lock.
    pub fn cancel_validation(&mut self) -> Result<()> {
        if self.state == ValidatorState::Closed {
            return Err(MdfError::ValidatorClosed);
        }
        self.state = ValidatorState::Closed;
        if let Some(w) = self.writer.take() {
            let path = w.path().to_path_buf();
            w.discard()?;
            tracing::info!("cancelled; removed {}", path.display());
        }
        Ok(())
    }

    /// Finish the dataset, keeping the feedstock. Returns its path.
    pub fn close(&mut self) -> Result<PathBuf> {
        match self.state {
            ValidatorState::Closed => return Err(MdfError::ValidatorClosed),
            ValidatorState::Init => return Err(MdfError::DatasetNotStarted),
            ValidatorState::Open => {}
        }
        self.state = ValidatorState::Closed;
        let writer = self.writer.take().ok_or(MdfError::ValidatorClosed)?;
        let path = writer.finish()?;
        tracing::info!(
            accepted = self.accepted,
            rejected = self.rejected,
            "closed feedstock {}",
            path.display()
        );
        Ok(path)
    }

    fn fail_io(&mut self) {
        self.state = ValidatorState::Closed;
        if let Some(w) = self.writer.take() {
            let path = w.path().to_path_buf();
            if let Err(e) = w.finish() {
                tracing::warn!("flush after failure: {e}");
            }
            tracing::error!("feedstock write failed; partial file left at {}", path.display());
        }
    }
}

impl Drop for Validator {
    fn drop(&mut self) {
        if self.state == ValidatorState::Open {
            if let Some(path) = self.feedstock_path() {
                tracing::debug!("validator dropped while open; keeping {}", path.display());
            }
        }
    }
}

/// `"public"` grants everyone access, so it cannot share a list with named principals.
fn check_acl(acl: Option<&Value>, report: &mut ValidationReport) {
    let Some(Value::Array(list)) = acl else { return };
    let public = list.iter().any(|v| v.as_str() == Some(PUBLIC_ACL));
    let private = list.iter().any(|v| v.as_str() != Some(PUBLIC_ACL));
    if public && private {
        report.errors.push(
            FieldIssue::new("acl", "\"public\" cannot be combined with other principals")
                .with_value(&Value::Array(list.clone())),
        );
    }
}

fn into_object(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
