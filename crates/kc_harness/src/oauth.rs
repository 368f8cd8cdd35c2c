//! OAuth client configuration handed to tests, and OIDC discovery.

use crate::error::{HarnessError, Result};
use reqwest::blocking::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Scope requested when none is given.
pub const DEFAULT_SCOPE: &str = "openid";

/// Everything a client-credentials caller needs to obtain a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_endpoint: String,
    pub scopes: Vec<String>,
}

impl OAuthConfig {
    /// Config requesting the default `openid` scope.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_endpoint: token_endpoint.into(),
            scopes: vec![DEFAULT_SCOPE.to_string()],
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }
}

/// The part of an OpenID Connect discovery document the harness reads.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    pub token_endpoint: String,
    #[serde(default)]
    pub issuer: Option<String>,
}

/// Well-known discovery URL for `realm` on `host:port`.
pub fn discovery_url(host: &str, port: u16, realm: &str) -> String {
    format!(
        "http://{}:{}/realms/{}/.well-known/openid-configuration",
        host, port, realm
    )
}

/// Fetch and parse a discovery document.
pub fn fetch_discovery(http: &HttpClient, url: &str) -> Result<DiscoveryDocument> {
    debug!("Fetching OpenID configuration from {}", url);
    let response = http.get(url).send()?;
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        return Err(HarnessError::Api { status, body });
    }
    Ok(response.json()?)
}
