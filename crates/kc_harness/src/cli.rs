//! Command implementations for the kc-harness binary.
//!
//! Each invocation is a fresh process, so every command other than `start`
//! re-attaches to the running node with the bootstrap admin credentials.

use anyhow::{bail, Context, Result};
use clap::Args;
use kc_harness::settings::{
    KC_ADMIN, KC_ADMIN_PASSWORD, KC_INSTALL_DIR, KC_LOG_FILE, KC_PORT, KC_ROOT_LOG_LEVEL,
};
use kc_harness::{
    AdminCredentials, ConfigValue, KeycloakService, LocalNode, RemoteNode, ServiceSettings,
    SshNode, DEFAULT_REALM,
};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

type Service = KeycloakService<Box<dyn RemoteNode>>;

/// Which node to drive and how Keycloak is laid out on it.
#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    /// SSH host running Keycloak (omit to use this machine)
    #[arg(long, env = "KC_HARNESS_HOST", global = true)]
    pub host: Option<String>,

    /// SSH user
    #[arg(long, env = "KC_HARNESS_SSH_USER", global = true)]
    pub ssh_user: Option<String>,

    /// SSH port
    #[arg(long, env = "KC_HARNESS_SSH_PORT", global = true)]
    pub ssh_port: Option<u16>,

    /// SSH identity file
    #[arg(long, env = "KC_HARNESS_SSH_IDENTITY", global = true)]
    pub identity: Option<PathBuf>,

    /// Extra `-o` option for ssh/scp (e.g. StrictHostKeyChecking=no); repeatable
    #[arg(long = "ssh-option", global = true)]
    pub ssh_options: Vec<String>,

    /// Keycloak HTTP port
    #[arg(long, env = "KC_HARNESS_PORT", default_value_t = KC_PORT, global = true)]
    pub port: u16,

    /// Realm to provision
    #[arg(long, env = "KC_HARNESS_REALM", default_value = DEFAULT_REALM, global = true)]
    pub realm: String,

    /// Keycloak root log level
    #[arg(long, env = "KC_HARNESS_LOG_LEVEL", default_value = KC_ROOT_LOG_LEVEL, global = true)]
    pub log_level: String,

    /// Keycloak install directory on the node
    #[arg(long, env = "KC_HARNESS_INSTALL_DIR", default_value = KC_INSTALL_DIR, global = true)]
    pub install_dir: String,

    /// Keycloak log file on the node
    #[arg(long, env = "KC_HARNESS_LOG_FILE", default_value = KC_LOG_FILE, global = true)]
    pub log_file: String,

    /// Bootstrap admin user
    #[arg(long, env = "KC_HARNESS_ADMIN_USER", default_value = KC_ADMIN, global = true)]
    pub admin_user: String,

    /// Bootstrap admin password
    #[arg(
        long,
        env = "KC_HARNESS_ADMIN_PASSWORD",
        default_value = KC_ADMIN_PASSWORD,
        hide_env_values = true,
        global = true
    )]
    pub admin_password: String,

    /// Seconds to wait for Keycloak to report readiness
    #[arg(long, env = "KC_HARNESS_STARTUP_TIMEOUT", default_value_t = 120, global = true)]
    pub startup_timeout: u64,
}

impl NodeArgs {
    pub fn settings(&self) -> ServiceSettings {
        ServiceSettings::default()
            .with_port(self.port)
            .with_realm(self.realm.clone())
            .with_log_level(self.log_level.clone())
            .with_install_dir(self.install_dir.clone())
            .with_log_file(self.log_file.clone())
            .with_admin(AdminCredentials::new(
                self.admin_user.clone(),
                self.admin_password.clone(),
            ))
            .with_startup_timeout(Duration::from_secs(self.startup_timeout))
    }

    pub fn node(&self) -> Box<dyn RemoteNode> {
        match &self.host {
            Some(host) => Box::new(self.ssh_node(host)),
            None => Box::new(LocalNode::new()),
        }
    }

    fn ssh_node(&self, host: &str) -> SshNode {
        let mut node = SshNode::new(host);
        if let Some(user) = &self.ssh_user {
            node = node.with_user(user.clone());
        }
        if let Some(port) = self.ssh_port {
            node = node.with_port(port);
        }
        if let Some(identity) = &self.identity {
            node = node.with_identity_file(identity.clone());
        }
        for option in &self.ssh_options {
            node = node.with_option(option.clone());
        }
        node
    }

    fn service(&self) -> Result<Service> {
        KeycloakService::new(self.node(), self.settings()).context("Failed to create service")
    }

    fn attached_service(&self) -> Result<Service> {
        let mut service = self.service()?;
        service
            .attach_admin()
            .with_context(|| format!("Failed to log into Keycloak at {}", service.server_url()))?;
        Ok(service)
    }
}

/// A user to create on start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSpec {
    pub username: String,
    pub password: String,
    pub realm_admin: bool,
}

/// Parse `name:password[:admin]`.
pub fn parse_user(raw: &str) -> std::result::Result<UserSpec, String> {
    let mut parts = raw.splitn(3, ':');
    let username = parts.next().unwrap_or_default();
    let password = parts.next().unwrap_or_default();
    if username.is_empty() || password.is_empty() {
        return Err(format!("expected name:password[:admin], got `{}`", raw));
    }
    let realm_admin = match parts.next() {
        None => false,
        Some("admin") => true,
        Some(other) => return Err(format!("unknown user flag `{}`", other)),
    };
    Ok(UserSpec {
        username: username.to_string(),
        password: password.to_string(),
        realm_admin,
    })
}

/// Parse `key=value` into a config option; an empty value unsets the key.
pub fn parse_override(raw: &str) -> std::result::Result<(String, Option<ConfigValue>), String> {
    let (key, value) = split_pair(raw)?;
    let value = if value.is_empty() {
        None
    } else if let Ok(b) = value.parse::<bool>() {
        Some(ConfigValue::Bool(b))
    } else if let Ok(i) = value.parse::<i64>() {
        Some(ConfigValue::Int(i))
    } else {
        Some(ConfigValue::Str(value.to_string()))
    };
    Ok((key.to_string(), value))
}

/// Parse `key=value` into a JSON field; non-JSON values become strings.
pub fn parse_field(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = split_pair(raw)?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn split_pair(raw: &str) -> std::result::Result<(&str, &str), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => Err(format!("expected key=value, got `{}`", raw)),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn run_start(
    args: &NodeArgs,
    token_lifespan: u64,
    overrides: Vec<(String, Option<ConfigValue>)>,
    clients: &[String],
    users: &[UserSpec],
) -> Result<()> {
    let mut service = args.service()?;
    service
        .start_node(token_lifespan, overrides)
        .context("Failed to start Keycloak")?;

    let admin = service.admin()?;
    for client in clients {
        admin
            .create_client(client, Map::new())
            .with_context(|| format!("Failed to create client {}", client))?;
        admin.generate_client_secret(client)?;
        info!("Created client {}", client);
    }
    for user in users {
        admin
            .create_user(&user.username, &user.password, user.realm_admin, Map::new())
            .with_context(|| format!("Failed to create user {}", user.username))?;
        info!("Created user {}", user.username);
    }

    let mut oauth = Vec::new();
    for client in clients {
        oauth.push(service.generate_oauth_config(client)?);
    }
    print_json(&json!({
        "discovery_url": service.discovery_url(),
        "clients": oauth,
    }))
}

pub fn run_stop(args: &NodeArgs, clean_shutdown: bool) -> Result<()> {
    let mut service = args.service()?;
    service
        .stop_node(clean_shutdown)
        .context("Failed to stop Keycloak")
}

pub fn run_clean(args: &NodeArgs) -> Result<()> {
    let mut service = args.service()?;
    service.clean_node().context("Failed to clean Keycloak node")
}

pub fn run_status(args: &NodeArgs) -> Result<()> {
    let service = args.service()?;
    let pids = service.pids()?;
    print_json(&json!({
        "host": service.host(),
        "alive": !pids.is_empty(),
        "pids": pids,
        "discovery_url": service.discovery_url(),
    }))
}

pub fn run_discovery_url(args: &NodeArgs) -> Result<()> {
    println!("{}", args.service()?.discovery_url());
    Ok(())
}

pub fn run_create_client(args: &NodeArgs, client_id: &str, generate_secret: bool) -> Result<()> {
    let service = args.attached_service()?;
    let admin = service.admin()?;
    let id = admin.create_client(client_id, Map::new())?;
    let secret = if generate_secret {
        Some(admin.generate_client_secret(client_id)?)
    } else {
        None
    };
    print_json(&json!({ "id": id, "client_id": client_id, "secret": secret }))
}

pub fn run_create_user(
    args: &NodeArgs,
    username: &str,
    password: &str,
    realm_admin: bool,
) -> Result<()> {
    let service = args.attached_service()?;
    let id = service
        .admin()?
        .create_user(username, password, realm_admin, Map::new())?;
    print_json(&json!({ "id": id, "username": username }))
}

pub fn run_update_user(args: &NodeArgs, username: &str, fields: Vec<(String, Value)>) -> Result<()> {
    if fields.is_empty() {
        bail!("no fields to update; pass --field key=value");
    }
    let service = args.attached_service()?;
    service
        .admin()?
        .update_user(username, fields.into_iter().collect())?;
    Ok(())
}

pub fn run_oauth_config(args: &NodeArgs, client_id: &str) -> Result<()> {
    let service = args.attached_service()?;
    print_json(&service.generate_oauth_config(client_id)?)
}

pub fn run_collect_logs(args: &NodeArgs, dest: &Path) -> Result<()> {
    let path = args.service()?.collect_logs(dest)?;
    println!("{}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user() {
        assert_eq!(
            parse_user("alice:pw").unwrap(),
            UserSpec {
                username: "alice".into(),
                password: "pw".into(),
                realm_admin: false
            }
        );
        assert!(parse_user("bob:pw:admin").unwrap().realm_admin);
        assert!(parse_user("bob").is_err());
        assert!(parse_user("bob:pw:root").is_err());
    }

    #[test]
    fn test_parse_override_types() {
        assert_eq!(
            parse_override("http-enabled=false").unwrap(),
            ("http-enabled".to_string(), Some(ConfigValue::Bool(false)))
        );
        assert_eq!(
            parse_override("http-port=9090").unwrap(),
            ("http-port".to_string(), Some(ConfigValue::Int(9090)))
        );
        assert_eq!(
            parse_override("proxy=edge").unwrap(),
            ("proxy".to_string(), Some(ConfigValue::Str("edge".into())))
        );
        assert_eq!(parse_override("proxy=").unwrap(), ("proxy".to_string(), None));
        assert!(parse_override("=x").is_err());
        assert!(parse_override("novalue").is_err());
    }

    #[test]
    fn test_parse_field() {
        assert_eq!(
            parse_field("enabled=false").unwrap(),
            ("enabled".to_string(), Value::Bool(false))
        );
        assert_eq!(
            parse_field("email=a@x.io").unwrap(),
            ("email".to_string(), Value::String("a@x.io".into()))
        );
    }

    fn test_args() -> NodeArgs {
        NodeArgs {
            host: None,
            ssh_user: None,
            ssh_port: None,
            identity: None,
            ssh_options: Vec::new(),
            port: 9090,
            realm: "r1".into(),
            log_level: "DEBUG".into(),
            install_dir: "/srv/kc".into(),
            log_file: "/tmp/kc.log".into(),
            admin_user: "root".into(),
            admin_password: "pw".into(),
            startup_timeout: 5,
        }
    }

    #[test]
    fn test_node_args_settings() {
        let args = test_args();
        let settings = args.settings();
        assert_eq!(settings.port, 9090);
        assert_eq!(settings.conf_dir(), "/srv/kc/conf");
        assert_eq!(settings.admin, AdminCredentials::new("root", "pw"));
        assert_eq!(settings.startup_timeout, Duration::from_secs(5));
        assert_eq!(args.node().hostname(), "localhost");
    }

    #[test]
    fn test_node_args_ssh_options_reach_ssh() {
        let args = NodeArgs {
            host: Some("kc-1".into()),
            ssh_user: Some("ubuntu".into()),
            ssh_port: Some(2222),
            ssh_options: vec!["StrictHostKeyChecking=no".into()],
            ..test_args()
        };
        assert_eq!(args.node().hostname(), "kc-1");

        let ssh_args = args.ssh_node("kc-1").ssh_args("true");
        assert_eq!(
            ssh_args,
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "StrictHostKeyChecking=no",
                "-p",
                "2222",
                "ubuntu@kc-1",
                "true"
            ]
        );
    }
}
