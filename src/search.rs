//! Blocking client for the Globus Search REST API, scoped to a default index.

use crate::auth::Authorizer;
use crate::config::IngestOptions;
use crate::error::{MdfError, Result};
use crate::namespace::NamespaceMapper;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_SEARCH_URL: &str = "https://search.api.globus.org";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Anything that can accept a `GIngest` body. The pipeline depends on this
/// rather than on the HTTP client directly.
pub trait Ingest: Sync {
    fn ingest(&self, body: &Value, index: Option<&str>) -> Result<Value>;
}

/// Optional arguments to a simple search.
#[derive(Clone, Debug, Default)]
pub struct SearchParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub resource_type: Option<String>,
    pub advanced: Option<bool>,
    pub index: Option<String>,
}

impl SearchParams {
    pub fn limit(mut self, n: u32) -> Self { self.limit = Some(n); self }
    pub fn offset(mut self, n: u32) -> Self { self.offset = Some(n); self }
    pub fn resource_type(mut self, t: impl Into<String>) -> Self { self.resource_type = Some(t.into()); self }
    pub fn advanced(mut self, yes: bool) -> Self { self.advanced = Some(yes); self }
    pub fn index(mut self, index: impl Into<String>) -> Self { self.index = Some(index.into()); self }

    fn to_query(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if let Some(n) = self.limit { out.push(("limit".into(), n.to_string())); }
        if let Some(n) = self.offset { out.push(("offset".into(), n.to_string())); }
        if let Some(t) = &self.resource_type { out.push(("type".into(), t.clone())); }
        if let Some(a) = self.advanced { out.push(("advanced".into(), a.to_string())); }
        out
    }
}

/// A search response. `contents()` strips index namespaces from the results.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchResults {
    pub raw: Value,
}

impl SearchResults {
    pub fn total(&self) -> u64 {
        self.raw.get("total").and_then(Value::as_u64).unwrap_or(0)
    }

    pub fn count(&self) -> u64 {
        self.raw.get("count").and_then(Value::as_u64).unwrap_or(0)
    }

    pub fn subjects(&self) -> Vec<&str> {
        self.gmeta().filter_map(|g| g.get("subject").and_then(Value::as_str)).collect()
    }

    /// Every content object of every result, with short keys.
    pub fn contents(&self) -> Vec<Value> {
        let mapper = NamespaceMapper::new();
        self.gmeta()
            .flat_map(|g| match g.get("content") {
                Some(Value::Array(list)) => list.iter().collect::<Vec<_>>(),
                Some(obj @ Value::Object(_)) => vec![obj],
                _ => Vec::new(),
            })
            .map(|c| mapper.remove_namespace(c))
            .collect()
    }

    fn gmeta(&self) -> impl Iterator<Item = &Value> {
        self.raw.get("gmeta").and_then(Value::as_array).into_iter().flatten()
    }
}

pub struct SearchClient {
    http: Client,
    base_url: String,
    default_index: Option<String>,
    default_params: Vec<(String, String)>,
    auth: Authorizer,
}

impl SearchClient {
    pub fn new(
        base_url: impl Into<String>,
        default_index: Option<String>,
        auth: Authorizer,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MdfError::config(format!("build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_index,
            default_params: Vec::new(),
            auth,
        })
    }

    /// Build from options: base URL, default index, timeout and credential file.
    pub fn from_options(opts: &IngestOptions) -> Result<Self> {
        let creds = opts
            .credential_file
            .as_ref()
            .ok_or_else(|| MdfError::Auth("no credential file configured (MDF_CREDENTIALS)".into()))?;
        let auth = Authorizer::from_credential_file(creds, opts.http_timeout)?;
        Self::new(opts.search_base_url.clone(), opts.default_index.clone(), auth, opts.http_timeout)
    }

    /// Query parameter sent with every simple search unless the call overrides it.
    pub fn with_default_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_params.push((key.into(), value.into()));
        self
    }

    pub fn default_index(&self) -> Option<&str> {
        self.default_index.as_deref()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn resolve_index<'a>(&'a self, index: Option<&'a str>) -> Result<&'a str> {
        index.or(self.default_index.as_deref()).ok_or(MdfError::MissingIndex)
    }

    /// GET /v1/search/<index>
    pub fn search(&self, q: &str, params: &SearchParams) -> Result<SearchResults> {
        let index = self.resolve_index(params.index.as_deref())?;
        let url = format!("{}/v1/search/{index}", self.base_url);

        let call = params.to_query();
        let mut query: Vec<(String, String)> = self
            .default_params
            .iter()
            .filter(|(k, _)| k != "q" && !call.iter().any(|(ck, _)| ck == k))
            .cloned()
            .collect();
        query.push(("q".into(), q.to_string()));
        query.extend(call);

        self.send(|http| http.get(&url).query(&query)).map(|raw| SearchResults { raw })
    }

    /// POST /v1/search/<index>
    pub fn structured_search(&self, body: &Value, index: Option<&str>) -> Result<SearchResults> {
        let index = self.resolve_index(index)?;
        let url = format!("{}/v1/search/{index}", self.base_url);
        self.send(|http| http.post(&url).json(body)).map(|raw| SearchResults { raw })
    }

    /// POST /v1/ingest/<index>
    pub fn ingest(&self, body: &Value, index: Option<&str>) -> Result<Value> {
        let index = self.resolve_index(index)?;
        let url = format!("{}/v1/ingest/{index}", self.base_url);
        self.send(|http| http.post(&url).json(body))
    }

    /// DELETE /v1/index/<index>/subject?subject=<URI>
    pub fn remove(&self, subject: &str, index: Option<&str>) -> Result<Value> {
        let index = self.resolve_index(index)?;
        let url = format!("{}/v1/index/{index}/subject", self.base_url);
        self.send(|http| http.delete(&url).query(&[("subject", subject)]))
    }

    /// Send with authorization; a 401 triggers one token refresh and retry.
    fn send(&self, build: impl Fn(&Client) -> RequestBuilder) -> Result<Value> {
        let mut retried = false;
        loop {
            let token = self.auth.bearer()?;
            let resp = build(&self.http).bearer_auth(token).send()?;
            let status = resp.status();

            if status == StatusCode::UNAUTHORIZED && !retried && self.auth.on_unauthorized()? {
                tracing::debug!("search service answered 401; retrying with a refreshed token");
                retried = true;
                continue;
            }

            let text = resp.text()?;
            if !status.is_success() {
                tracing::warn!(status = status.as_u16(), "search service request failed");
                return Err(MdfError::remote(Some(status.as_u16()), text));
            }
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_str(&text)?);
        }
    }
}

impl Ingest for SearchClient {
    fn ingest(&self, body: &Value, index: Option<&str>) -> Result<Value> {
        SearchClient::ingest(self, body, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(default_index: Option<&str>) -> SearchClient {
        SearchClient::new(
            "http://127.0.0.1:9/",
            default_index.map(str::to_string),
            Authorizer::access_token("t"),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn index_resolution_prefers_explicit_then_default() {
        let c = client(Some("mdf"));
        assert_eq!(c.resolve_index(Some("other")).unwrap(), "other");
        assert_eq!(c.resolve_index(None).unwrap(), "mdf");
        assert_eq!(c.base_url(), "http://127.0.0.1:9");
    }

    #[test]
    fn missing_index_fails_before_any_request() {
        let c = client(None);
        assert!(matches!(c.search("q", &SearchParams::default()), Err(MdfError::MissingIndex)));
        assert!(matches!(c.ingest(&json!({}), None), Err(MdfError::MissingIndex)));
        assert!(matches!(c.remove("http://x", None), Err(MdfError::MissingIndex)));
        assert!(matches!(c.structured_search(&json!({}), None), Err(MdfError::MissingIndex)));
    }

    #[test]
    fn results_strip_namespaces() {
        let ns = NamespaceMapper::new();
        let raw = json!({
            "total": 1, "count": 1,
            "gmeta": [{"subject": "http://x/1", "content": [ns.add_namespace(&json!({"title": "T"}))]}]
        });
        let results = SearchResults { raw };
        assert_eq!(results.total(), 1);
        assert_eq!(results.subjects(), vec!["http://x/1"]);
        assert_eq!(results.contents(), vec![json!({"title": "T"})]);
    }
}
