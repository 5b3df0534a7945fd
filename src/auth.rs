//! Authorization for the search client: a static access token, or a refresh
//! token that is exchanged for access tokens on demand.

use crate::error::{MdfError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Exchanges a refresh token for a fresh access token.
pub trait TokenRefresher: Send + Sync {
    fn refresh(&self, refresh_token: &str) -> Result<String>;
}

/// Called with every newly obtained access token, e.g. to write it back to disk.
pub type PersistHook = Arc<dyn Fn(&str) -> Result<()> + Send + Sync>;

pub enum Authorizer {
    AccessToken(String),
    RefreshToken(RefreshTokenAuthorizer),
}

impl fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authorizer::AccessToken(_) => f.write_str("Authorizer::AccessToken(..)"),
            Authorizer::RefreshToken(_) => f.write_str("Authorizer::RefreshToken(..)"),
        }
    }
}

impl Authorizer {
    pub fn access_token(token: impl Into<String>) -> Self {
        Authorizer::AccessToken(token.into())
    }

    /// Token to send with the next request.
    pub fn bearer(&self) -> Result<String> {
        match self {
            Authorizer::AccessToken(t) => Ok(t.clone()),
            Authorizer::RefreshToken(r) => r.current(),
        }
    }

    /// Called after a 401. Returns true when a new token was obtained and the
    /// request is worth retrying.
    pub fn on_unauthorized(&self) -> Result<bool> {
        match self {
            Authorizer::AccessToken(_) => Ok(false),
            Authorizer::RefreshToken(r) => r.refresh().map(|_| true),
        }
    }

    /// Build an authorizer from a credential file. A refresh token (with a token
    /// URL) wins over a bare access token; refreshed tokens are written back to the file.
    pub fn from_credential_file(path: &Path, timeout: Duration) -> Result<Self> {
        let creds = Credentials::load(path)?;
        match (&creds.refresh_token, &creds.token_url) {
            (Some(refresh), Some(url)) => {
                let refresher = HttpTokenRefresher::new(url.clone(), creds.client_id.clone(), creds.client_secret.clone(), timeout)?;
                let path = path.to_path_buf();
                let mut auth = RefreshTokenAuthorizer::new(refresh.clone(), Arc::new(refresher))
                    .on_refresh(Arc::new(move |token: &str| Credentials::store_access_token(&path, token)));
                if let Some(access) = &creds.access_token {
                    auth = auth.with_access_token(access.clone());
                }
                Ok(Authorizer::RefreshToken(auth))
            }
            _ => creds
                .access_token
                .map(Authorizer::AccessToken)
                .ok_or_else(|| MdfError::Auth(format!("{} holds no usable token", path.display()))),
        }
    }
}

pub struct RefreshTokenAuthorizer {
    refresh_token: String,
    refresher: Arc<dyn TokenRefresher>,
    on_refresh: Option<PersistHook>,
    access: Mutex<Option<String>>,
}

impl RefreshTokenAuthorizer {
    pub fn new(refresh_token: impl Into<String>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self { refresh_token: refresh_token.into(), refresher, on_refresh: None, access: Mutex::new(None) }
    }

    /// Start from a previously issued access token instead of refreshing on first use.
    pub fn with_access_token(self, token: impl Into<String>) -> Self {
        *self.access.lock() = Some(token.into());
        self
    }

    pub fn on_refresh(mut self, hook: PersistHook) -> Self {
        self.on_refresh = Some(hook);
        self
    }

    fn current(&self) -> Result<String> {
        if let Some(t) = self.access.lock().as_ref() {
            return Ok(t.clone());
        }
        self.refresh()
    }

    fn refresh(&self) -> Result<String> {
        let token = self.refresher.refresh(&self.refresh_token)?;
        *self.access.lock() = Some(token.clone());
        tracing::debug!("obtained a new access token");
        if let Some(hook) = &self.on_refresh {
            if let Err(e) = hook(&token) {
                tracing::warn!("could not persist refreshed access token: {e}");
            }
        }
        Ok(token)
    }
}

/// OAuth2 `refresh_token` grant against a token endpoint.
pub struct HttpTokenRefresher {
    http: reqwest::blocking::Client,
    token_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl HttpTokenRefresher {
    pub fn new(
        token_url: String,
        client_id: Option<String>,
        client_secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MdfError::Auth(format!("build token client: {e}")))?;
        Ok(Self { http, token_url, client_id, client_secret })
    }
}

impl TokenRefresher for HttpTokenRefresher {
    fn refresh(&self, refresh_token: &str) -> Result<String> {
        let mut form = vec![("grant_type", "refresh_token"), ("refresh_token", refresh_token)];
        if let (Some(id), None) = (&self.client_id, &self.client_secret) {
            form.push(("client_id", id.as_str()));
        }
        let mut req = self.http.post(&self.token_url).form(&form);
        if let (Some(id), Some(secret)) = (&self.client_id, &self.client_secret) {
            req = req.basic_auth(id, Some(secret));
        }

        let resp = req.send().map_err(|e| MdfError::Auth(format!("token request failed: {e}")))?;
        let status = resp.status();
        let body = resp.text().map_err(|e| MdfError::Auth(format!("token response unreadable: {e}")))?;
        if !status.is_success() {
            return Err(MdfError::Auth(format!("token endpoint answered {status}: {body}")));
        }
        let parsed: Value = serde_json::from_str(&body)
            .map_err(|e| MdfError::Auth(format!("token response is not JSON: {e}")))?;
        parsed
            .get("access_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| MdfError::Auth("token response has no access_token".into()))
    }
}

/// Contents of a credential file. Unknown keys are kept so rewriting the file
/// does not lose them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Credentials {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| MdfError::Auth(format!("read credentials {}: {e}", path.display())))?;
        serde_json::from_str(&text).map_err(|e| MdfError::Auth(format!("parse credentials {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp: PathBuf = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn store_access_token(path: &Path, token: &str) -> Result<()> {
        let mut creds = Credentials::load(path)?;
        creds.access_token = Some(token.to_string());
        creds.save(path)
    }
}
