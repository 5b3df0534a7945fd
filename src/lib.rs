mod concurrency;
mod config;
mod paths;
mod progress;
mod util;

mod auth;
mod envelope;
mod error;
mod ident;
mod json_utils;
mod namespace;
mod schema;
mod search;

mod feedstock;
mod pipeline;
mod validator;

pub use crate::config::{BatchLimit, IngestOptions};
pub use crate::error::{MdfError, Result};

pub use crate::pipeline::{DriveSummary, IngestReport, MdfPipeline, SourceSelection};
pub use crate::validator::{
    BatchOutcome, DatasetOutcome, RecordOutcome, Validator, ValidatorState, VALIDATOR_VERSION,
};

pub use crate::schema::{
    is_blank, FieldIssue, FieldLevel, SchemaKind, SchemaRegistry, ValidationReport, DEFAULT_SCHEMA_VERSION,
};
pub use crate::ident::{id_timestamp, IdMinter};
pub use crate::namespace::{NamespaceMapper, DEFAULT_NAMESPACE};
pub use crate::envelope::{EnvelopeFormatter, GIngest, GMetaEntry, GMetaList, COMMUNITY_KEY};

// HTTP surface and the seam the driver ingests through.
pub use crate::auth::{
    Authorizer, Credentials, HttpTokenRefresher, PersistHook, RefreshTokenAuthorizer, TokenRefresher,
};
pub use crate::search::{Ingest, SearchClient, SearchParams, SearchResults};

// Feedstock files, for converters and tools that read them back.
pub use crate::feedstock::{FeedstockLock, FeedstockReader, FeedstockWriter};
pub use crate::paths::{discover_feedstocks, feedstock_path, FeedstockJob};

pub use crate::progress::set_global_multiprogress;
pub use crate::util::init_tracing_once;
