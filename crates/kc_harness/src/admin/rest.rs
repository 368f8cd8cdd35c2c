//! Blocking REST implementation of [`RealmAdmin`].

use super::{AdminConnector, ClientSecret, RealmAdmin, RoleRef};
use crate::error::{HarnessError, Result};
use crate::settings::AdminCredentials;
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{ACCEPT, LOCATION};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

const ADMIN_CLI_CLIENT: &str = "admin-cli";
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    60
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// Connects [`KeycloakAdmin`] instances over HTTP.
#[derive(Debug, Clone)]
pub struct KeycloakConnector {
    timeout: Duration,
}

impl Default for KeycloakConnector {
    fn default() -> Self {
        Self {
            timeout: HTTP_TIMEOUT,
        }
    }
}

impl KeycloakConnector {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl AdminConnector for KeycloakConnector {
    type Admin = KeycloakAdmin;

    fn connect(
        &self,
        server_url: &str,
        credentials: &AdminCredentials,
        realm: &str,
    ) -> Result<KeycloakAdmin> {
        KeycloakAdmin::login(server_url, credentials, realm, self.timeout)
    }
}

/// Admin API client authenticated with a password grant against `admin-cli`.
///
/// The login realm is fixed at construction; [`RealmAdmin::set_realm`] only
/// moves the realm that `/admin/realms/...` calls address.
pub struct KeycloakAdmin {
    http: HttpClient,
    base_url: Url,
    login_realm: String,
    realm: String,
    credentials: AdminCredentials,
    token: Mutex<Option<AccessToken>>,
}

impl KeycloakAdmin {
    /// Log in to `realm` on `server_url`; fails if the credentials are rejected.
    pub fn login(
        server_url: &str,
        credentials: &AdminCredentials,
        realm: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let mut base_url = Url::parse(server_url)?;
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }
        let http = HttpClient::builder().timeout(timeout).build()?;

        let admin = Self {
            http,
            base_url,
            login_realm: realm.to_string(),
            realm: realm.to_string(),
            credentials: credentials.clone(),
            token: Mutex::new(None),
        };
        admin.access_token()?;
        Ok(admin)
    }

    /// Realm the token is issued by.
    pub fn login_realm(&self) -> &str {
        &self.login_realm
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| HarnessError::InvalidInput(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn realm_url(&self, segments: &[&str]) -> Result<Url> {
        let mut all = vec!["admin", "realms", self.realm.as_str()];
        all.extend_from_slice(segments);
        self.url(&all)
    }

    fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder
            .bearer_auth(self.access_token()?)
            .header(ACCEPT, "application/json")
            .send()?;
        check_status(response)
    }

    fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        Ok(self.send(builder)?.json::<T>()?)
    }

    fn access_token(&self) -> Result<String> {
        let mut guard = self
            .token
            .lock()
            .map_err(|_| HarnessError::invalid_state("admin token lock poisoned"))?;
        if let Some(token) = guard.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.value.clone());
            }
        }

        let token_url = self.url(&[
            "realms",
            self.login_realm.as_str(),
            "protocol",
            "openid-connect",
            "token",
        ])?;
        debug!("Requesting admin token from {}", token_url);
        let form = [
            ("grant_type", "password"),
            ("client_id", ADMIN_CLI_CLIENT),
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
        ];
        let response = check_status(self.http.post(token_url).form(&form).send()?)?;
        let token: TokenResponse = response.json()?;

        *guard = Some(AccessToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(token.access_token)
    }

    /// Id of the first item whose `field` equals `wanted`.
    ///
    /// Keycloak stores usernames lowercased, so those compare without case;
    /// client ids are case-sensitive.
    fn find_id(items: Vec<Value>, field: &str, wanted: &str) -> Option<String> {
        let case_sensitive = field != "username";
        items.into_iter().find_map(|item| {
            let matches = item
                .get(field)
                .and_then(|v| v.as_str())
                .map(|v| {
                    if case_sensitive {
                        v == wanted
                    } else {
                        v.eq_ignore_ascii_case(wanted)
                    }
                })
                .unwrap_or(false);
            if matches {
                item.get("id").and_then(|v| v.as_str()).map(String::from)
            } else {
                None
            }
        })
    }
}

fn check_status(response: Response) -> Result<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        Err(HarnessError::Api { status, body })
    }
}

/// Id of a created resource, taken from the last segment of `Location`.
fn created_id(response: &Response) -> Result<String> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|location| location.trim_end_matches('/').rsplit('/').next())
        .filter(|id| !id.is_empty())
        .map(String::from)
        .ok_or_else(|| HarnessError::Api {
            status: response.status().as_u16(),
            body: "created resource has no Location header".to_string(),
        })
}

impl RealmAdmin for KeycloakAdmin {
    fn realm(&self) -> &str {
        &self.realm
    }

    fn set_realm(&mut self, realm: &str) {
        self.realm = realm.to_string();
    }

    fn create_realm(&self, payload: &Value) -> Result<()> {
        let url = self.url(&["admin", "realms"])?;
        self.send(self.http.post(url).json(payload))?;
        Ok(())
    }

    fn create_client(&self, payload: &Value) -> Result<String> {
        let url = self.realm_url(&["clients"])?;
        let response = self.send(self.http.post(url).json(payload))?;
        created_id(&response)
    }

    fn get_client_id(&self, client_id: &str) -> Result<Option<String>> {
        let mut url = self.realm_url(&["clients"])?;
        url.query_pairs_mut().append_pair("clientId", client_id);
        let clients: Vec<Value> = self.send_json(self.http.get(url))?;
        Ok(Self::find_id(clients, "clientId", client_id))
    }

    fn generate_client_secrets(&self, id: &str) -> Result<ClientSecret> {
        let url = self.realm_url(&["clients", id, "client-secret"])?;
        self.send_json(self.http.post(url))
    }

    fn get_client_secrets(&self, id: &str) -> Result<ClientSecret> {
        let url = self.realm_url(&["clients", id, "client-secret"])?;
        self.send_json(self.http.get(url))
    }

    fn create_user(&self, payload: &Value) -> Result<String> {
        let url = self.realm_url(&["users"])?;
        let response = self.send(self.http.post(url).json(payload))?;
        created_id(&response)
    }

    fn get_user_id(&self, username: &str) -> Result<Option<String>> {
        let mut url = self.realm_url(&["users"])?;
        url.query_pairs_mut()
            .append_pair("username", username)
            .append_pair("exact", "true");
        let users: Vec<Value> = self.send_json(self.http.get(url))?;
        Ok(Self::find_id(users, "username", username))
    }

    fn update_user(&self, user_id: &str, payload: &Value) -> Result<()> {
        let url = self.realm_url(&["users", user_id])?;
        self.send(self.http.put(url).json(payload))?;
        Ok(())
    }

    fn get_client_role_id(&self, id: &str, role_name: &str) -> Result<String> {
        let url = self.realm_url(&["clients", id, "roles", role_name])?;
        let role: Value = self.send_json(self.http.get(url))?;
        role.get("id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| HarnessError::not_found(format!("Role {} has no id", role_name)))
    }

    fn assign_client_role(&self, user_id: &str, id: &str, roles: &[RoleRef]) -> Result<()> {
        let url = self.realm_url(&["users", user_id, "role-mappings", "clients", id])?;
        self.send(self.http.post(url).json(roles))?;
        Ok(())
    }
}
