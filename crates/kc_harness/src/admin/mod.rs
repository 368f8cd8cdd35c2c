//! Realm provisioning through the Keycloak admin API.
//!
//! [`RealmAdmin`] is the capability the harness needs from an admin API
//! client; [`AdminConnector`] logs in and produces one. [`AdminClient`] layers
//! the harness conventions on top: realm bootstrap on construction, minimal
//! client/user representations, and id resolution on every call.

pub mod rest;

use crate::error::{HarnessError, Result};
use crate::settings::AdminCredentials;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

pub use rest::{KeycloakAdmin, KeycloakConnector};

/// Realm every bootstrap login happens in.
pub const MASTER_REALM: &str = "master";
/// Built-in client that owns the realm management roles.
pub const REALM_MANAGEMENT_CLIENT: &str = "realm-management";
/// Client role granting full administration of a realm.
pub const REALM_ADMIN_ROLE: &str = "realm-admin";

/// A client credential as returned by the admin API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSecret {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub value: String,
}

/// Reference to a role for role-mapping calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRef {
    pub id: String,
    pub name: String,
}

/// Admin API operations, scoped to the realm returned by [`RealmAdmin::realm`].
///
/// `client_id` arguments named `id` are the server-side internal ids, not the
/// human-readable `clientId`.
pub trait RealmAdmin {
    /// Realm subsequent calls operate on.
    fn realm(&self) -> &str;

    /// Point subsequent calls at another realm, keeping the current login.
    fn set_realm(&mut self, realm: &str);

    fn create_realm(&self, payload: &Value) -> Result<()>;

    /// Create a client and return its internal id.
    fn create_client(&self, payload: &Value) -> Result<String>;

    /// Resolve a `clientId` to its internal id.
    fn get_client_id(&self, client_id: &str) -> Result<Option<String>>;

    fn generate_client_secrets(&self, id: &str) -> Result<ClientSecret>;

    fn get_client_secrets(&self, id: &str) -> Result<ClientSecret>;

    /// Create a user and return its id.
    fn create_user(&self, payload: &Value) -> Result<String>;

    /// Resolve a username to its id.
    fn get_user_id(&self, username: &str) -> Result<Option<String>>;

    fn update_user(&self, user_id: &str, payload: &Value) -> Result<()>;

    fn get_client_role_id(&self, id: &str, role_name: &str) -> Result<String>;

    fn assign_client_role(&self, user_id: &str, id: &str, roles: &[RoleRef]) -> Result<()>;
}

/// Logs into an admin API and yields a [`RealmAdmin`] scoped to the login realm.
pub trait AdminConnector {
    type Admin: RealmAdmin;

    fn connect(
        &self,
        server_url: &str,
        credentials: &AdminCredentials,
        realm: &str,
    ) -> Result<Self::Admin>;
}

/// Minimal confidential client able to use the client-credentials grant.
pub fn client_representation(client_id: &str, overrides: Map<String, Value>) -> Value {
    let mut rep = json!({
        "clientId": client_id,
        "enabled": true,
        "serviceAccountsEnabled": true,
    });
    merge_object(&mut rep, overrides);
    rep
}

/// Enabled user with a permanent password credential.
pub fn user_representation(username: &str, password: &str, overrides: Map<String, Value>) -> Value {
    let mut rep = json!({
        "username": username,
        "credentials": [{
            "type": "password",
            "value": password,
            "temporary": false,
        }],
        "enabled": true,
    });
    merge_object(&mut rep, overrides);
    rep
}

fn merge_object(target: &mut Value, overrides: Map<String, Value>) {
    if let Value::Object(map) = target {
        map.extend(overrides);
    }
}

/// Harness-level admin client bound to one working realm.
pub struct AdminClient<A: RealmAdmin> {
    admin: A,
}

impl<A: RealmAdmin> AdminClient<A> {
    /// Log into the master realm, create `realm`, and scope to it.
    ///
    /// Fails if the realm already exists; nothing is retried.
    pub fn new<C>(
        connector: &C,
        server_url: &str,
        realm: &str,
        credentials: &AdminCredentials,
        access_token_lifespan_s: u64,
    ) -> Result<Self>
    where
        C: AdminConnector<Admin = A>,
    {
        debug!("AdminClient for {}", server_url);
        let mut admin = connector.connect(server_url, credentials, MASTER_REALM)?;
        admin.create_realm(&json!({
            "realm": realm,
            "enabled": true,
            "accessTokenLifespan": access_token_lifespan_s,
        }))?;
        admin.set_realm(realm);
        Ok(Self { admin })
    }

    /// Log into the master realm and scope to an existing `realm`.
    pub fn attach<C>(
        connector: &C,
        server_url: &str,
        realm: &str,
        credentials: &AdminCredentials,
    ) -> Result<Self>
    where
        C: AdminConnector<Admin = A>,
    {
        debug!("AdminClient attaching to {} realm {}", server_url, realm);
        let mut admin = connector.connect(server_url, credentials, MASTER_REALM)?;
        admin.set_realm(realm);
        Ok(Self { admin })
    }

    /// Wrap an already logged-in admin.
    pub fn from_admin(admin: A) -> Self {
        Self { admin }
    }

    /// Replace the login with `credentials` authenticated directly in `realm`.
    pub fn config<C>(
        &mut self,
        connector: &C,
        server_url: &str,
        credentials: &AdminCredentials,
        realm: &str,
    ) -> Result<()>
    where
        C: AdminConnector<Admin = A>,
    {
        self.admin = connector.connect(server_url, credentials, realm)?;
        Ok(())
    }

    pub fn realm(&self) -> &str {
        self.admin.realm()
    }

    /// The wrapped admin, for calls this type does not cover.
    pub fn realm_admin(&self) -> &A {
        &self.admin
    }

    /// Create a client; `overrides` replace or extend the default representation.
    pub fn create_client(&self, client_id: &str, overrides: Map<String, Value>) -> Result<String> {
        let id = self
            .admin
            .create_client(&client_representation(client_id, overrides))?;
        debug!("client_id: {}", id);
        Ok(id)
    }

    /// Generate a new secret for `client_id` and return it.
    pub fn generate_client_secret(&self, client_id: &str) -> Result<String> {
        let id = self.resolve_client(client_id)?;
        Ok(self.admin.generate_client_secrets(&id)?.value)
    }

    /// Current secret of `client_id`.
    pub fn get_client_secret(&self, client_id: &str) -> Result<String> {
        let id = self.resolve_client(client_id)?;
        Ok(self.admin.get_client_secrets(&id)?.value)
    }

    /// Create a user with a permanent password; optionally grant realm-admin.
    pub fn create_user(
        &self,
        username: &str,
        password: &str,
        realm_admin: bool,
        overrides: Map<String, Value>,
    ) -> Result<String> {
        let user_id = self
            .admin
            .create_user(&user_representation(username, password, overrides))?;

        if realm_admin {
            let client_id = self.resolve_client(REALM_MANAGEMENT_CLIENT)?;
            let role_id = self.admin.get_client_role_id(&client_id, REALM_ADMIN_ROLE)?;
            self.admin.assign_client_role(
                &user_id,
                &client_id,
                &[RoleRef {
                    id: role_id,
                    name: REALM_ADMIN_ROLE.to_string(),
                }],
            )?;
        }

        Ok(user_id)
    }

    /// Apply a partial update to an existing user.
    pub fn update_user(&self, username: &str, fields: Map<String, Value>) -> Result<()> {
        let user_id = self
            .admin
            .get_user_id(username)?
            .ok_or_else(|| HarnessError::not_found(format!("User {} not found", username)))?;

        self.admin.update_user(&user_id, &Value::Object(fields))
    }

    fn resolve_client(&self, client_id: &str) -> Result<String> {
        self.admin
            .get_client_id(client_id)?
            .ok_or_else(|| HarnessError::not_found(format!("Client {} not found", client_id)))
    }
}
