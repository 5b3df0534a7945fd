use crate::envelope::{DEFAULT_COMMUNITY, DEFAULT_GMETA_VERSION};
use crate::error::{MdfError, Result};
use crate::schema::DEFAULT_SCHEMA_VERSION;
use crate::search::{DEFAULT_SEARCH_URL, DEFAULT_TIMEOUT_SECS};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// How many entries go into one ingest call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchLimit {
    Bounded(usize),
    /// Everything in one call (`-1` on the command line).
    Unlimited,
}

impl BatchLimit {
    /// `n >= 1` is a bound, `-1` means unlimited; anything else is rejected.
    pub fn from_i64(n: i64) -> Result<Self> {
        match n {
            -1 => Ok(BatchLimit::Unlimited),
            n if n >= 1 => Ok(BatchLimit::Bounded(n as usize)),
            n => Err(MdfError::config(format!("batch size must be >= 1 or -1, got {n}"))),
        }
    }

    pub fn is_full(&self, buffered: usize) -> bool {
        match self {
            BatchLimit::Bounded(n) => buffered >= *n,
            BatchLimit::Unlimited => false,
        }
    }
}

impl Default for BatchLimit {
    fn default() -> Self {
        BatchLimit::Bounded(100)
    }
}

impl fmt::Display for BatchLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchLimit::Bounded(n) => write!(f, "{n}"),
            BatchLimit::Unlimited => f.write_str("-1"),
        }
    }
}

impl FromStr for BatchLimit {
    type Err = MdfError;
    fn from_str(s: &str) -> Result<Self> {
        let n: i64 = s
            .trim()
            .parse()
            .map_err(|_| MdfError::config(format!("batch size must be an integer, got '{s}'")))?;
        BatchLimit::from_i64(n)
    }
}

/// Options shared by the validator, the search client and the driver.
/// Passed explicitly; nothing is read from process-wide state after construction.
#[derive(Clone, Debug)]
pub struct IngestOptions {
    pub feedstock_dir: PathBuf,
    pub search_base_url: String,
    pub default_index: Option<String>,
    pub credential_file: Option<PathBuf>,
    pub http_timeout: Duration,

    pub schema_version: String,
    pub schema_dir: Option<PathBuf>, // None = schemas compiled into the binary
    pub strict: bool,                // warnings count as errors

    pub batch_size: BatchLimit,
    pub verbose: bool,               // progress bar + per-dataset summary
    pub source_concurrency: usize,   // datasets driven in parallel

    pub gmeta_version: String,
    pub community: String,

    // IO tuning
    pub read_buffer_bytes: usize,
    pub write_buffer_bytes: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            feedstock_dir: PathBuf::from("./feedstock"),
            search_base_url: DEFAULT_SEARCH_URL.to_string(),
            default_index: Some("mdf".to_string()),
            credential_file: None,
            http_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),

            schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
            schema_dir: None,
            strict: false,

            batch_size: BatchLimit::default(),
            verbose: false,
            source_concurrency: 1,

            gmeta_version: DEFAULT_GMETA_VERSION.to_string(),
            community: DEFAULT_COMMUNITY.to_string(),

            read_buffer_bytes: 256 * 1024,
            write_buffer_bytes: 64 * 1024,
        }
    }
}

impl IngestOptions {
    /// Defaults overlaid with `MDF_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Like `from_env`, with an injectable variable lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut opts = Self::default();
        if let Some(dir) = get("MDF_FEEDSTOCK_DIR") {
            opts.feedstock_dir = PathBuf::from(dir);
        }
        if let Some(url) = get("MDF_SEARCH_URL") {
            opts.search_base_url = url;
        }
        if let Some(index) = get("MDF_SEARCH_INDEX") {
            opts.default_index = if index.trim().is_empty() { None } else { Some(index) };
        }
        if let Some(path) = get("MDF_CREDENTIALS") {
            opts.credential_file = Some(PathBuf::from(path));
        }
        if let Some(secs) = get("MDF_HTTP_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|_| MdfError::config(format!("MDF_HTTP_TIMEOUT_SECS must be whole seconds, got '{secs}'")))?;
            opts.http_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(n) = get("MDF_BATCH_SIZE") {
            opts.batch_size = n.parse()?;
        }
        if let Some(dir) = get("MDF_SCHEMA_DIR") {
            opts.schema_dir = Some(PathBuf::from(dir));
        }
        Ok(opts)
    }

    pub fn with_feedstock_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.feedstock_dir = dir.as_ref().to_path_buf();
        self
    }
    pub fn with_search_base_url(mut self, url: impl Into<String>) -> Self {
        self.search_base_url = url.into();
        self
    }
    pub fn with_default_index(mut self, index: Option<String>) -> Self {
        self.default_index = index;
        self
    }
    pub fn with_credential_file(mut self, path: impl AsRef<Path>) -> Self {
        self.credential_file = Some(path.as_ref().to_path_buf());
        self
    }
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }
    pub fn with_schema_version(mut self, version: impl Into<String>) -> Self {
        self.schema_version = version.into();
        self
    }
    pub fn with_schema_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.schema_dir = Some(dir.as_ref().to_path_buf());
        self
    }
    pub fn with_strict(mut self, yes: bool) -> Self {
        self.strict = yes;
        self
    }
    pub fn with_batch_size(mut self, limit: BatchLimit) -> Self {
        self.batch_size = limit;
        self
    }
    pub fn with_verbose(mut self, yes: bool) -> Self {
        self.verbose = yes;
        self
    }
    pub fn with_source_concurrency(mut self, n: usize) -> Self {
        self.source_concurrency = n.max(1);
        self
    }
    pub fn with_gmeta_version(mut self, version: impl Into<String>) -> Self {
        self.gmeta_version = version.into();
        self
    }
    pub fn with_community(mut self, community: impl Into<String>) -> Self {
        self.community = community.into();
        self
    }

    // IO buffers tuning
    pub fn with_io_buffers(mut self, read_bytes: usize, write_bytes: usize) -> Self {
        self.read_buffer_bytes = read_bytes.max(8 * 1024);
        self.write_buffer_bytes = write_bytes.max(8 * 1024);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn batch_limits_parse() {
        assert_eq!(BatchLimit::from_i64(1).unwrap(), BatchLimit::Bounded(1));
        assert_eq!(BatchLimit::from_i64(-1).unwrap(), BatchLimit::Unlimited);
        assert!(BatchLimit::from_i64(0).is_err());
        assert!(BatchLimit::from_i64(-5).is_err());
        assert_eq!("250".parse::<BatchLimit>().unwrap(), BatchLimit::Bounded(250));
        assert!("many".parse::<BatchLimit>().is_err());
        assert!(BatchLimit::Bounded(2).is_full(2));
        assert!(!BatchLimit::Unlimited.is_full(usize::MAX));
    }

    #[test]
    fn environment_overrides_defaults() {
        let env: HashMap<&str, &str> = [
            ("MDF_FEEDSTOCK_DIR", "/tmp/fs"),
            ("MDF_SEARCH_INDEX", ""),
            ("MDF_HTTP_TIMEOUT_SECS", "5"),
            ("MDF_BATCH_SIZE", "-1"),
        ]
        .into_iter()
        .collect();
        let opts = IngestOptions::from_lookup(|k| env.get(k).map(|s| s.to_string())).unwrap();
        assert_eq!(opts.feedstock_dir, PathBuf::from("/tmp/fs"));
        assert_eq!(opts.default_index, None);
        assert_eq!(opts.http_timeout, Duration::from_secs(5));
        assert_eq!(opts.batch_size, BatchLimit::Unlimited);
        assert_eq!(opts.search_base_url, DEFAULT_SEARCH_URL);
    }

    #[test]
    fn bad_environment_values_are_config_errors() {
        let bad = IngestOptions::from_lookup(|k| (k == "MDF_BATCH_SIZE").then(|| "0".to_string()));
        assert!(matches!(bad, Err(MdfError::Config(_))));
    }
}
