//! `keycloak.conf` rendering and delivery.
//!
//! A [`KeycloakConfig`] is an insertion-ordered option map. Each node start
//! builds a fresh one from [`KeycloakConfig::defaults`] plus its overrides, so
//! no start ever observes another start's options.

use crate::error::Result;
use crate::remote::RemoteNode;
use crate::settings::{remote_join, KC_LOG_FILE, KC_LOG_HANDLER, KC_PORT, KC_ROOT_LOG_LEVEL};
use serde_json::{Map, Value};
use std::fmt;
use std::io::Write;
use tracing::debug;

/// File name Keycloak reads its options from.
pub const KC_CFG: &str = "keycloak.conf";

/// A scalar option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Str(s) => write!(f, "{}", s),
            ConfigValue::Int(i) => write!(f, "{}", i),
            ConfigValue::Bool(true) => write!(f, "true"),
            ConfigValue::Bool(false) => write!(f, "false"),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Str(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Str(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Int(value)
    }
}

impl From<u16> for ConfigValue {
    fn from(value: u16) -> Self {
        ConfigValue::Int(i64::from(value))
    }
}

impl From<u32> for ConfigValue {
    fn from(value: u32) -> Self {
        ConfigValue::Int(i64::from(value))
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<&ConfigValue> for Value {
    fn from(value: &ConfigValue) -> Self {
        match value {
            ConfigValue::Str(s) => Value::String(s.clone()),
            ConfigValue::Int(i) => Value::from(*i),
            ConfigValue::Bool(b) => Value::Bool(*b),
        }
    }
}

/// Ordered option map; `None` entries are kept but never rendered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeycloakConfig {
    entries: Vec<(String, Option<ConfigValue>)>,
}

impl KeycloakConfig {
    /// An empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// The baseline every node starts from.
    pub fn defaults() -> Self {
        let mut cfg = Self::new();
        cfg.set("http-port", Some(KC_PORT.into()));
        cfg.set("hostname", None);
        cfg.set("hostname-port", Some(KC_PORT.into()));
        cfg.set("http-enabled", Some(true.into()));
        cfg.set("proxy", Some("passthrough".into()));
        cfg.set("log", Some(KC_LOG_HANDLER.into()));
        cfg.set("log-file", Some(KC_LOG_FILE.into()));
        cfg.set("log-level", Some(KC_ROOT_LOG_LEVEL.into()));
        cfg
    }

    /// Set an option, replacing any existing value in place.
    pub fn set(&mut self, key: impl Into<String>, value: Option<ConfigValue>) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Look up an option. The outer `Option` is presence, the inner is the value.
    pub fn get(&self, key: &str) -> Option<Option<&ConfigValue>> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_ref())
    }

    /// A copy of this document with `overrides` applied; later keys win.
    pub fn merged<I, K>(&self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<ConfigValue>)>,
        K: Into<String>,
    {
        let mut merged = self.clone();
        for (key, value) in overrides {
            merged.set(key, value);
        }
        merged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as `key=value` lines, skipping unset options.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            if let Some(value) = value {
                out.push_str(key);
                out.push('=');
                out.push_str(&value.to_string());
                out.push('\n');
            }
        }
        out
    }

    /// JSON view of the full document, unset options as `null`.
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.as_ref().map(Value::from).unwrap_or(Value::Null)))
            .collect();
        Value::Object(map)
    }
}

/// Renders a [`KeycloakConfig`] and installs it on a node.
#[derive(Debug, Clone)]
pub struct ConfigWriter {
    dest_dir: String,
    config: KeycloakConfig,
}

impl ConfigWriter {
    /// Writer for the defaults merged with `overrides`, targeting `dest_dir`.
    pub fn new<I, K>(dest_dir: impl Into<String>, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<ConfigValue>)>,
        K: Into<String>,
    {
        Self::with_config(dest_dir, KeycloakConfig::defaults().merged(overrides))
    }

    /// Writer for an already-built document.
    pub fn with_config(dest_dir: impl Into<String>, config: KeycloakConfig) -> Self {
        Self {
            dest_dir: dest_dir.into(),
            config,
        }
    }

    pub fn config(&self) -> &KeycloakConfig {
        &self.config
    }

    /// Remote path the document is written to.
    pub fn dest_path(&self) -> String {
        remote_join(&self.dest_dir, KC_CFG)
    }

    /// Copy the rendered document to the node and return its remote path.
    pub fn write<N: RemoteNode + ?Sized>(&self, node: &N) -> Result<String> {
        if let Err(e) = node.mkdirs(&self.dest_dir) {
            debug!("Ignoring mkdirs failure for {} on {}: {}", self.dest_dir, node.name(), e);
        }

        let dest = self.dest_path();
        let mut scratch = tempfile::NamedTempFile::new()?;
        scratch.write_all(self.config.render().as_bytes())?;
        scratch.flush()?;

        node.copy_to(scratch.path(), &dest)?;
        debug!("Wrote {} to {}", dest, node.name());
        Ok(dest)
    }
}
