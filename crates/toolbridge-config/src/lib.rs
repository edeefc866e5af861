//! `servers_config` parsing.
//!
//! Accepts the JSON object a host stores as credentials (server name →
//! connection parameters), optionally wrapped in the desktop-client
//! `{"mcpServers": {...}}` envelope, and produces typed [`ServerConfig`]
//! values in the order the servers were written.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use toolbridge_core::{BridgeError, Result};
use tracing::{debug, info};

pub mod env_substitution;

pub use env_substitution::{substitute_in_string, substitute_map};

/// Default per-request timeout, in seconds
pub const DEFAULT_TIMEOUT_SECS: f64 = 30.0;

/// One configured MCP server
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub name: String,
    pub transport: TransportConfig,
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        match &self.transport {
            TransportConfig::Process(process) => process.timeout,
            TransportConfig::Network(network) => network.timeout,
        }
    }

    pub fn transport_type(&self) -> &'static str {
        self.transport.transport_type()
    }
}

/// Connection parameters, exactly one transport kind per server
#[derive(Debug, Clone, PartialEq)]
pub enum TransportConfig {
    Process(ProcessConfig),
    Network(NetworkConfig),
}

impl TransportConfig {
    pub fn transport_type(&self) -> &'static str {
        match self {
            TransportConfig::Process(_) => "stdio",
            TransportConfig::Network(_) => "sse",
        }
    }
}

/// Subprocess speaking MCP over stdin/stdout
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Added on top of the inherited environment
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

/// HTTP endpoint speaking MCP over Server-Sent Events
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

/// Raw entry as written by the user, before validation
#[derive(Debug, Deserialize)]
struct RawServerEntry {
    #[serde(rename = "type")]
    transport_type: Option<String>,
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    url: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    timeout: Option<f64>,
    #[serde(default)]
    disabled: bool,
}

/// Ordered set of enabled servers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServersConfig {
    servers: Vec<ServerConfig>,
}

impl ServersConfig {
    /// Parse the `servers_config` JSON text supplied by the host.
    pub fn from_json_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(BridgeError::ConfigError(
                "Please fill in the servers_config".into(),
            ));
        }

        let value: Value = serde_json::from_str(text).map_err(|e| {
            BridgeError::ConfigError(format!("servers_config must be a valid JSON string: {}", e))
        })?;

        Self::from_value(value)
    }

    /// Load a config file, YAML for `.yaml`/`.yml` and JSON otherwise.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading MCP servers configuration from: {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::ConfigError(format!(
                "Failed to read servers config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );

        if is_yaml {
            let value: Value = serde_yaml::from_str(&content).map_err(|e| {
                BridgeError::ConfigError(format!(
                    "Failed to parse servers config YAML from {}: {}",
                    path.display(),
                    e
                ))
            })?;
            Self::from_value(value)
        } else {
            Self::from_json_str(&content)
        }
    }

    /// Build from an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        let mut map = match value {
            Value::Object(map) => map,
            other => {
                return Err(BridgeError::ConfigError(format!(
                    "servers_config must be a JSON object mapping server names to settings, got {}",
                    json_kind(&other)
                )))
            }
        };

        if map.len() == 1 && map.get("mcpServers").is_some_and(Value::is_object) {
            if let Some(Value::Object(inner)) = map.remove("mcpServers") {
                map = inner;
            }
        }

        let mut servers = Vec::with_capacity(map.len());
        for (name, entry) in map {
            let raw: RawServerEntry = serde_json::from_value(entry).map_err(|e| {
                BridgeError::ConfigError(format!("Invalid settings for server '{}': {}", name, e))
            })?;

            if raw.disabled {
                info!("Skipping disabled MCP server '{}'", name);
                continue;
            }

            let server = build_server(name, raw)?;
            debug!(
                "Configured MCP server '{}' ({})",
                server.name,
                server.transport_type()
            );
            servers.push(server);
        }

        Ok(Self { servers })
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ServerConfig> {
        self.servers.iter()
    }
}

impl IntoIterator for ServersConfig {
    type Item = ServerConfig;
    type IntoIter = std::vec::IntoIter<ServerConfig>;

    fn into_iter(self) -> Self::IntoIter {
        self.servers.into_iter()
    }
}

impl FromIterator<ServerConfig> for ServersConfig {
    fn from_iter<I: IntoIterator<Item = ServerConfig>>(iter: I) -> Self {
        Self {
            servers: iter.into_iter().collect(),
        }
    }
}

fn build_server(name: String, mut raw: RawServerEntry) -> Result<ServerConfig> {
    if name.trim().is_empty() {
        return Err(BridgeError::ConfigError("Server name cannot be empty".into()));
    }

    let timeout = parse_timeout(&name, raw.timeout)?;

    let transport = match (raw.command.take(), raw.url.take()) {
        (Some(_), Some(_)) => {
            return Err(BridgeError::ConfigError(format!(
                "Server '{}' must set exactly one of 'command' or 'url'",
                name
            )))
        }
        (None, None) => {
            return Err(BridgeError::ConfigError(format!(
                "Server '{}' is missing required field 'command' or 'url'",
                name
            )))
        }
        (Some(command), None) => {
            check_type_hint(&name, raw.transport_type.as_deref(), "stdio")?;
            if command.trim().is_empty() {
                return Err(BridgeError::ConfigError(format!(
                    "Server '{}' has an empty 'command'",
                    name
                )));
            }
            substitute_map(&mut raw.env, &format!("{}.env", name))?;
            TransportConfig::Process(ProcessConfig {
                command,
                args: raw.args,
                env: raw.env,
                timeout,
            })
        }
        (None, Some(url)) => {
            check_type_hint(&name, raw.transport_type.as_deref(), "sse")?;
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(BridgeError::ConfigError(format!(
                    "Server '{}' url must start with http:// or https://",
                    name
                )));
            }
            substitute_map(&mut raw.headers, &format!("{}.headers", name))?;
            TransportConfig::Network(NetworkConfig {
                url,
                headers: raw.headers,
                timeout,
            })
        }
    };

    Ok(ServerConfig { name, transport })
}

fn check_type_hint(name: &str, hint: Option<&str>, expected: &str) -> Result<()> {
    match hint {
        None => Ok(()),
        Some(hint) if hint.eq_ignore_ascii_case(expected) => Ok(()),
        Some(hint) => Err(BridgeError::ConfigError(format!(
            "Server '{}' declares type '{}' but its fields describe a {} server",
            name, hint, expected
        ))),
    }
}

fn parse_timeout(name: &str, timeout: Option<f64>) -> Result<Duration> {
    let secs = timeout.unwrap_or(DEFAULT_TIMEOUT_SECS);
    if !secs.is_finite() || secs <= 0.0 {
        return Err(BridgeError::ConfigError(format!(
            "Server '{}' timeout must be a positive number of seconds",
            name
        )));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
