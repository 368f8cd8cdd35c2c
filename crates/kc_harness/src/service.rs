//! Keycloak node lifecycle: configure, launch, wait, provision, stop, clean.
//!
//! A [`KeycloakService`] owns exactly one node by value. It is not `Clone`, so
//! two controllers can never drive the same node; hand the node back with
//! [`KeycloakService::into_node`] when done.

use crate::admin::{AdminClient, AdminConnector, KeycloakConnector};
use crate::config::{ConfigValue, ConfigWriter};
use crate::error::{HarnessError, Result};
use crate::oauth::{self, OAuthConfig};
use crate::remote::{shell_quote, RemoteNode};
use crate::settings::{AdminCredentials, ServiceSettings};
use crate::wait::{wait_until, LogMonitor};
use reqwest::blocking::Client as HttpClient;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Lifecycle state of the managed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    /// Stopped, and possibly cleaned
    Stopped,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::NotStarted => write!(f, "not started"),
            NodeState::Starting => write!(f, "starting"),
            NodeState::Running => write!(f, "running"),
            NodeState::Stopping => write!(f, "stopping"),
            NodeState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Controller for one Keycloak node.
pub struct KeycloakService<N: RemoteNode, C: AdminConnector = KeycloakConnector> {
    node: N,
    settings: ServiceSettings,
    connector: C,
    http: HttpClient,
    admin: Option<AdminClient<C::Admin>>,
    remote_config_file: Option<String>,
    state: NodeState,
}

impl<N: RemoteNode> KeycloakService<N, KeycloakConnector> {
    /// Controller talking to the admin API over HTTP.
    pub fn new(node: N, settings: ServiceSettings) -> Result<Self> {
        Self::with_connector(node, settings, KeycloakConnector::default())
    }
}

impl<N: RemoteNode, C: AdminConnector> KeycloakService<N, C> {
    /// Controller using `connector` to reach the admin API.
    pub fn with_connector(node: N, settings: ServiceSettings, connector: C) -> Result<Self> {
        let http = HttpClient::builder().timeout(DISCOVERY_TIMEOUT).build()?;
        Ok(Self {
            node,
            settings,
            connector,
            http,
            admin: None,
            remote_config_file: None,
            state: NodeState::NotStarted,
        })
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn node(&self) -> &N {
        &self.node
    }

    /// Release the node.
    pub fn into_node(self) -> N {
        self.node
    }

    /// Remote path of the config written by the last start, if any.
    pub fn remote_config_file(&self) -> Option<&str> {
        self.remote_config_file.as_deref()
    }

    /// Admin client for the working realm; available once the node is running.
    pub fn admin(&self) -> Result<&AdminClient<C::Admin>> {
        self.admin
            .as_ref()
            .ok_or_else(|| HarnessError::invalid_state("Keycloak admin client is not initialised"))
    }

    pub fn admin_mut(&mut self) -> Result<&mut AdminClient<C::Admin>> {
        self.admin
            .as_mut()
            .ok_or_else(|| HarnessError::invalid_state("Keycloak admin client is not initialised"))
    }

    pub fn host(&self) -> &str {
        self.node.hostname()
    }

    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.host(), self.settings.port)
    }

    pub fn discovery_url(&self) -> String {
        oauth::discovery_url(self.host(), self.settings.port, &self.settings.realm)
    }

    /// `token_endpoint` advertised by the realm's discovery document.
    pub fn token_endpoint(&self) -> Result<String> {
        Ok(oauth::fetch_discovery(&self.http, &self.discovery_url())?.token_endpoint)
    }

    /// Re-login the admin client as `username`, authenticated in the working realm.
    pub fn login_admin_user(&mut self, username: &str, password: &str) -> Result<()> {
        let server_url = self.server_url();
        let credentials = AdminCredentials::new(username, password);
        let admin = self
            .admin
            .as_mut()
            .ok_or_else(|| HarnessError::invalid_state("Keycloak admin client is not initialised"))?;
        admin.config(&self.connector, &server_url, &credentials, &self.settings.realm)
    }

    /// Log in as the bootstrap admin against an already-running node.
    ///
    /// Unlike [`start_node`](Self::start_node), the realm is expected to exist.
    pub fn attach_admin(&mut self) -> Result<()> {
        let admin = AdminClient::attach(
            &self.connector,
            &self.server_url(),
            &self.settings.realm,
            &self.settings.admin,
        )?;
        self.admin = Some(admin);
        self.state = NodeState::Running;
        Ok(())
    }

    /// Client credentials and token endpoint for `client_id`.
    pub fn generate_oauth_config(&self, client_id: &str) -> Result<OAuthConfig> {
        let secret = self.admin()?.get_client_secret(client_id)?;
        let token_endpoint = self.token_endpoint()?;
        Ok(OAuthConfig::new(client_id, secret, token_endpoint))
    }

    pub fn pids(&self) -> Result<Vec<u32>> {
        self.node.java_pids(&self.settings.process_marker)
    }

    pub fn alive(&self) -> Result<bool> {
        Ok(!self.pids()?.is_empty())
    }

    fn start_cmd(&self) -> Result<String> {
        Ok(format!(
            "nohup env LAUNCH_JBOSS_IN_BACKGROUND=1 KEYCLOAK_ADMIN={} KEYCLOAK_ADMIN_PASSWORD={} {} start-dev >/dev/null 2>&1 </dev/null &",
            shell_quote(&self.settings.admin.username)?,
            shell_quote(&self.settings.admin.password)?,
            shell_quote(&self.settings.launcher())?,
        ))
    }

    fn node_overrides(&self) -> Vec<(String, Option<ConfigValue>)> {
        vec![
            ("hostname".to_string(), Some(self.host().into())),
            ("hostname-port".to_string(), Some(self.settings.port.into())),
            ("http-port".to_string(), Some(self.settings.port.into())),
            ("log-level".to_string(), Some(self.settings.log_level.as_str().into())),
            ("log-file".to_string(), Some(self.settings.log_file.as_str().into())),
        ]
    }

    /// Configure and launch Keycloak, wait for readiness, then create the realm.
    ///
    /// `overrides` are applied after the per-node options, so they win. A
    /// failure before the launch command runs restores the previous state; a
    /// failed launch or a missing readiness marker force-kills the process and
    /// leaves the node `Stopped`. Either way `start_node` may be called again.
    pub fn start_node<I, K>(&mut self, access_token_lifespan_s: u64, overrides: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Option<ConfigValue>)>,
        K: Into<String>,
    {
        if matches!(self.state, NodeState::Starting | NodeState::Running) {
            return Err(HarnessError::invalid_state(format!(
                "Keycloak on {} is already {}",
                self.node.name(),
                self.state
            )));
        }
        info!("Starting Keycloak on {}", self.node.name());
        let previous = self.state;
        self.state = NodeState::Starting;

        let overrides: Vec<(String, Option<ConfigValue>)> = self
            .node_overrides()
            .into_iter()
            .chain(overrides.into_iter().map(|(k, v)| (k.into(), v)))
            .collect();
        if let Err(e) = self.install_config(overrides) {
            self.state = previous;
            return Err(e);
        }

        let cmd = match self.start_cmd() {
            Ok(cmd) => cmd,
            Err(e) => {
                self.state = previous;
                return Err(e);
            }
        };
        let monitor = match LogMonitor::new(&self.node, self.settings.log_file.as_str()) {
            Ok(monitor) => monitor,
            Err(e) => {
                self.state = previous;
                return Err(e);
            }
        };
        debug!("KC START CMD: {}", cmd);
        let ready = self.node.ssh(&cmd).and_then(|()| {
            monitor.wait_until(
                &self.settings.readiness_marker,
                self.settings.startup_timeout,
                self.settings.log_poll_interval,
            )
        });

        if let Err(e) = ready {
            self.abort_start();
            return Err(e);
        }

        self.state = NodeState::Running;
        debug!("Keycloak PIDs: {:?}", self.pids()?);

        let admin = AdminClient::new(
            &self.connector,
            &self.server_url(),
            &self.settings.realm,
            &self.settings.admin,
            access_token_lifespan_s,
        )?;
        self.admin = Some(admin);
        info!(
            "Keycloak running on {} with realm {}",
            self.node.name(),
            self.settings.realm
        );
        Ok(())
    }

    /// Write `keycloak.conf` and make sure the log file exists.
    fn install_config(&mut self, overrides: Vec<(String, Option<ConfigValue>)>) -> Result<()> {
        let writer = ConfigWriter::new(self.settings.conf_dir(), overrides);
        self.remote_config_file = Some(writer.write(&self.node)?);
        debug!("Starting Keycloak service {}", writer.config().to_json());

        self.node
            .ssh(&format!("touch {}", shell_quote(&self.settings.log_file)?))
    }

    fn abort_start(&mut self) {
        warn!(
            "Keycloak on {} did not become ready; killing it",
            self.node.name()
        );
        if let Err(e) = self.stop_node(false) {
            warn!("Failed to kill Keycloak on {}: {}", self.node.name(), e);
            self.state = NodeState::Stopped;
        }
    }

    /// Signal every Keycloak process and wait for all of them to exit.
    ///
    /// A failed `kill` is ignored only when its target is already gone. On
    /// error the previous state is restored.
    pub fn stop_node(&mut self, clean_shutdown: bool) -> Result<()> {
        let signal = if clean_shutdown { "TERM" } else { "KILL" };
        warn!("Stopping node {}", self.node.name());
        let previous = self.state;
        self.state = NodeState::Stopping;

        match self.signal_and_wait(signal) {
            Ok(()) => {
                self.state = NodeState::Stopped;
                Ok(())
            }
            Err(e) => {
                self.state = previous;
                Err(e)
            }
        }
    }

    fn signal_and_wait(&self, signal: &str) -> Result<()> {
        for pid in self.pids()? {
            if let Err(e) = self.node.ssh(&format!("kill -s {} {}", signal, pid)) {
                if self.pids()?.contains(&pid) {
                    return Err(e);
                }
                debug!("Process {} exited before SIG{}: {}", pid, signal, e);
            }
        }

        wait_until(
            || Ok(!self.alive()?),
            self.settings.stop_timeout,
            self.settings.stop_backoff,
            "Keycloak took too long to stop.",
        )
    }

    /// Stop Keycloak if needed and remove its log, data, and config.
    pub fn clean_node(&mut self) -> Result<()> {
        warn!("Cleaning Keycloak node {}", self.node.name());
        if self.alive()? {
            self.stop_node(true)?;
        }

        self.node
            .ssh(&format!("rm -rf {}", shell_quote(&self.settings.log_file)?))?;

        let data_dir = shell_quote(&self.settings.data_dir())?;
        if let Err(e) = self.node.ssh(&format!("rm -rf {}/*", data_dir)) {
            debug!("Ignoring data dir cleanup failure on {}: {}", self.node.name(), e);
        }

        if let Some(path) = &self.remote_config_file {
            self.node.ssh(&format!("rm {}", shell_quote(path)?))?;
        }
        self.remote_config_file = None;
        self.admin = None;
        self.state = NodeState::Stopped;
        Ok(())
    }

    /// Copy the service log into `dest_dir` and return the local path.
    pub fn collect_logs(&self, dest_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dest_dir)?;
        let file_name = Path::new(&self.settings.log_file)
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "keycloak.log".into());
        let dest = dest_dir.join(file_name);
        self.node.copy_from(&self.settings.log_file, &dest)?;
        Ok(dest)
    }
}
