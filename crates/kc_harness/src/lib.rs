//! Keycloak Test Harness
//!
//! Runs a single Keycloak node for integration tests: renders and uploads
//! `keycloak.conf`, launches the server over a shell connection, waits for the
//! readiness line in its log, then provisions a realm, clients, and users
//! through the admin API.
//!
//! # Usage
//!
//! ```rust,ignore
//! use kc_harness::{KeycloakService, ServiceSettings, SshNode, DEFAULT_AT_LIFESPAN_S};
//!
//! let node = SshNode::new("kc-1").with_user("ubuntu");
//! let mut service = KeycloakService::new(node, ServiceSettings::default())?;
//! service.start_node(DEFAULT_AT_LIFESPAN_S, kc_harness::no_overrides())?;
//!
//! service.admin()?.create_client("svc", Default::default())?;
//! service.admin()?.generate_client_secret("svc")?;
//! let oauth = service.generate_oauth_config("svc")?;
//!
//! service.clean_node()?;
//! ```

pub mod admin;
pub mod config;
pub mod error;
pub mod oauth;
pub mod remote;
pub mod service;
pub mod settings;
pub mod wait;

// Re-exports for convenience
pub use admin::{
    AdminClient, AdminConnector, ClientSecret, KeycloakAdmin, KeycloakConnector, RealmAdmin,
    RoleRef,
};
pub use config::{ConfigValue, ConfigWriter, KeycloakConfig};
pub use error::{HarnessError, Result};
pub use oauth::OAuthConfig;
pub use remote::{LocalNode, RemoteNode, SshNode};
pub use service::{KeycloakService, NodeState};
pub use settings::{AdminCredentials, ServiceSettings, DEFAULT_AT_LIFESPAN_S, DEFAULT_REALM};

/// Empty override list for [`KeycloakService::start_node`].
pub fn no_overrides() -> Vec<(String, Option<ConfigValue>)> {
    Vec::new()
}
