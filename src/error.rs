//! Error kinds shared by the validator, the search client and the driver.

use crate::schema::FieldIssue;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = MdfError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum MdfError {
    /// Metadata failed schema validation (missing or invalid field).
    #[error("schema validation failed: {}", summarize(.issues))]
    Schema { issues: Vec<FieldIssue> },

    /// Recommended metadata is missing. Callers that treat warnings as fatal use this.
    #[error("missing recommended metadata: {}", summarize(.issues))]
    MetadataWarning { issues: Vec<FieldIssue> },

    /// Another validator (in this or another process) holds the feedstock for this source.
    #[error("feedstock for source '{source_name}' is already open ({lock})")]
    AlreadyOpen { source_name: String, lock: String },

    #[error("validator is closed")]
    ValidatorClosed,

    #[error("dataset header has not been written yet")]
    DatasetNotStarted,

    #[error("dataset header was already written for source '{0}'")]
    DatasetAlreadyStarted(String),

    #[error("invalid ingest envelope: {0}")]
    InvalidEnvelope(String),

    #[error("no index given and no default index configured")]
    MissingIndex,

    /// HTTP failure from the search service. `status` is `None` for transport
    /// failures such as timeouts.
    #[error("search service error ({}): {body}", fmt_status(.status))]
    Remote { status: Option<u16>, body: String },

    #[error("authorization failed: {0}")]
    Auth(String),

    #[error("entropy source failed: {0}")]
    Entropy(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MdfError {
    pub fn remote(status: Option<u16>, body: impl Into<String>) -> Self {
        Self::Remote { status, body: body.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_envelope(msg: impl Into<String>) -> Self {
        Self::InvalidEnvelope(msg.into())
    }

    /// HTTP status carried by a `Remote` error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Remote { status, .. } => *status,
            _ => None,
        }
    }

    /// Field paths named by a `Schema` or `MetadataWarning` error.
    pub fn issue_paths(&self) -> Vec<&str> {
        match self {
            Self::Schema { issues } | Self::MetadataWarning { issues } => {
                issues.iter().map(|i| i.path.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl From<reqwest::Error> for MdfError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            MdfError::remote(None, "timeout")
        } else if let Some(status) = e.status() {
            MdfError::remote(Some(status.as_u16()), e.to_string())
        } else {
            MdfError::remote(None, e.to_string())
        }
    }
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| s.to_string()).unwrap_or_else(|| "no status".into())
}

fn summarize(issues: &[FieldIssue]) -> String {
    issues.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}
