//! Service configuration for a Keycloak test node.

use std::time::Duration;

/// Install root of the Keycloak distribution on the node.
pub const KC_INSTALL_DIR: &str = "/opt/keycloak";
/// Service log written by the Keycloak file handler.
pub const KC_LOG_FILE: &str = "/var/log/kc.log";
/// Default HTTP port.
pub const KC_PORT: u16 = 8080;
/// Root log level passed to Keycloak.
pub const KC_ROOT_LOG_LEVEL: &str = "INFO";
/// Log handlers enabled in the rendered config.
pub const KC_LOG_HANDLER: &str = "console,file";
/// Bootstrap admin user created by `start-dev`.
pub const KC_ADMIN: &str = "admin";
/// Bootstrap admin password.
pub const KC_ADMIN_PASSWORD: &str = "admin";
/// Realm provisioned on start unless overridden.
pub const DEFAULT_REALM: &str = "demorealm";
/// Access token lifespan for the provisioned realm, in seconds.
pub const DEFAULT_AT_LIFESPAN_S: u64 = 600;
/// Substring Keycloak logs once it accepts connections.
pub const READINESS_MARKER: &str = "Running the server in";
/// Marker identifying the Keycloak JVM in the process table.
pub const PROCESS_MARKER: &str = "quarkus";

const STARTUP_TIMEOUT: Duration = Duration::from_secs(120);
const STOP_TIMEOUT: Duration = Duration::from_secs(30);
const STOP_BACKOFF: Duration = Duration::from_millis(500);
const LOG_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Credentials used to log into the admin API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

impl AdminCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Default for AdminCredentials {
    fn default() -> Self {
        Self::new(KC_ADMIN, KC_ADMIN_PASSWORD)
    }
}

/// Settings for one Keycloak service node.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// HTTP port Keycloak listens on
    pub port: u16,
    /// Realm created and scoped on start
    pub realm: String,
    /// Root log level
    pub log_level: String,
    /// Keycloak install root on the node
    pub install_dir: String,
    /// Service log path on the node
    pub log_file: String,
    /// Bootstrap admin credentials
    pub admin: AdminCredentials,
    /// How long to wait for the readiness marker
    pub startup_timeout: Duration,
    /// How long to wait for the process to exit on stop
    pub stop_timeout: Duration,
    /// Poll interval while waiting for the process to exit
    pub stop_backoff: Duration,
    /// Poll interval while tailing the service log
    pub log_poll_interval: Duration,
    /// Process table marker used to find the service
    pub process_marker: String,
    /// Log substring that signals readiness
    pub readiness_marker: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            port: KC_PORT,
            realm: DEFAULT_REALM.to_string(),
            log_level: KC_ROOT_LOG_LEVEL.to_string(),
            install_dir: KC_INSTALL_DIR.to_string(),
            log_file: KC_LOG_FILE.to_string(),
            admin: AdminCredentials::default(),
            startup_timeout: STARTUP_TIMEOUT,
            stop_timeout: STOP_TIMEOUT,
            stop_backoff: STOP_BACKOFF,
            log_poll_interval: LOG_POLL_INTERVAL,
            process_marker: PROCESS_MARKER.to_string(),
            readiness_marker: READINESS_MARKER.to_string(),
        }
    }
}

impl ServiceSettings {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    pub fn with_log_level(mut self, log_level: impl Into<String>) -> Self {
        self.log_level = log_level.into();
        self
    }

    pub fn with_install_dir(mut self, install_dir: impl Into<String>) -> Self {
        self.install_dir = install_dir.into();
        self
    }

    pub fn with_log_file(mut self, log_file: impl Into<String>) -> Self {
        self.log_file = log_file.into();
        self
    }

    pub fn with_admin(mut self, admin: AdminCredentials) -> Self {
        self.admin = admin;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration, backoff: Duration) -> Self {
        self.stop_timeout = timeout;
        self.stop_backoff = backoff;
        self
    }

    pub fn with_log_poll_interval(mut self, interval: Duration) -> Self {
        self.log_poll_interval = interval;
        self
    }

    /// Directory holding `keycloak.conf`.
    pub fn conf_dir(&self) -> String {
        remote_join(&self.install_dir, "conf")
    }

    /// Keycloak data directory, wiped by `clean_node`.
    pub fn data_dir(&self) -> String {
        remote_join(&self.install_dir, "data")
    }

    /// Path of the `kc.sh` launcher.
    pub fn launcher(&self) -> String {
        remote_join(&remote_join(&self.install_dir, "bin"), "kc.sh")
    }
}

/// Join POSIX path segments for the remote node, independent of the local OS.
pub fn remote_join(base: &str, name: &str) -> String {
    if base.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), name.trim_start_matches('/'))
}
