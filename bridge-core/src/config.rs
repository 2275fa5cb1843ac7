// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates required fields up front so misconfiguration stops the bridge at startup

use crate::error::BridgeError;
use crate::identity::is_synthetic_nick;
use crate::paths;
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub matrix: MatrixConfig,
    #[serde(default)]
    pub irc: IrcConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// Base URL of the homeserver, e.g. `https://matrix.example.org`
    #[serde(default)]
    pub homeserver: String,
    /// Server name used in user IDs, e.g. `example.org`
    #[serde(default)]
    pub homeserver_domain: String,
    /// Application-service token
    #[serde(default)]
    pub token: String,
    /// The one room bridged to the IRC channel
    #[serde(default)]
    pub room_id: String,
}

// Custom Debug impl to redact the application-service token
impl std::fmt::Debug for MatrixConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixConfig")
            .field("homeserver", &self.homeserver)
            .field("homeserver_domain", &self.homeserver_domain)
            .field("token", &"[REDACTED]")
            .field("room_id", &self.room_id)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrcConfig {
    #[serde(default)]
    pub server: String,
    #[serde(default = "default_irc_port", deserialize_with = "deserialize_port")]
    pub port: u16,
    #[serde(default)]
    pub channel: String,
    /// Nick of the shared listener connection
    #[serde(default)]
    pub nick: String,
    #[serde(default)]
    pub user: String,
}

impl Default for IrcConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: default_irc_port(),
            channel: String::new(),
            nick: String::new(),
            user: String::new(),
        }
    }
}

impl IrcConfig {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Callback URL the homeserver pushes transactions to
    #[serde(default)]
    pub url: String,
    /// Perform the registration handshake at startup
    #[serde(default = "default_true")]
    pub register: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            register: true,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_host")]
    pub host: String,
    #[serde(default = "default_webhook_port")]
    pub port: u16,
    /// When set, transactions must carry this token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hs_token: Option<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            host: default_webhook_host(),
            port: default_webhook_port(),
            hs_token: None,
        }
    }
}

// Custom Debug impl to redact the homeserver token
impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("hs_token", &self.hs_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn default_irc_port() -> u16 {
    6667
}

fn default_webhook_host() -> String {
    "0.0.0.0".to_string()
}

fn default_webhook_port() -> u16 {
    9000
}

fn default_true() -> bool {
    true
}

/// Ports appear both as integers and as quoted strings in existing config files.
fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(n) => Ok(n),
        Port::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port: {s:?}"))),
    }
}

fn config_error(msg: impl Into<String>) -> anyhow::Error {
    BridgeError::Config(msg.into()).into()
}

impl Config {
    /// Find the config file, checking in order:
    /// 1. an explicit path (from the command line)
    /// 2. BRIDGE_CONFIG_PATH env var
    /// 3. ./config.toml
    /// 4. ~/.config/matrix-irc-bridge/config.toml
    fn find_config_file(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(config_error(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            return Ok(Some(path.to_path_buf()));
        }

        if let Ok(env_path) = std::env::var("BRIDGE_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Ok(Some(path));
            }
            tracing::warn!(path = %env_path, "BRIDGE_CONFIG_PATH points to a missing file");
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Ok(Some(local_config));
        }

        let user_config = paths::config_file();
        if user_config.exists() {
            return Ok(Some(user_config));
        }

        Ok(None)
    }

    /// Load configuration from the default search path
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration from `explicit` (or the search path), apply
    /// environment overrides and validate.
    pub fn load_from(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match Self::find_config_file(explicit)? {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading configuration from file");
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                Self::from_toml(&content)
                    .with_context(|| format!("Failed to parse {}", path.display()))?
            }
            None => {
                tracing::info!("No config file found, using environment variables and defaults");
                Config::default()
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Config>(content).map_err(|e| config_error(e.to_string()))
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("MATRIX_HOMESERVER") {
            self.matrix.homeserver = val;
        }
        if let Ok(val) = std::env::var("MATRIX_HOMESERVER_DOMAIN") {
            self.matrix.homeserver_domain = val;
        }
        if let Ok(val) = std::env::var("MATRIX_TOKEN") {
            self.matrix.token = val;
        }
        if let Ok(val) = std::env::var("MATRIX_ROOM_ID") {
            self.matrix.room_id = val;
        }
        if let Ok(val) = std::env::var("BRIDGE_URL") {
            self.bridge.url = val;
        }
        if let Ok(val) = std::env::var("IRC_SERVER") {
            self.irc.server = val;
        }
        if let Ok(val) = std::env::var("IRC_PORT") {
            self.irc.port = val.trim().parse().map_err(|_| {
                config_error(format!("IRC_PORT must be a valid port number, got: {}", val))
            })?;
        }
        if let Ok(val) = std::env::var("IRC_CHANNEL") {
            self.irc.channel = val;
        }
        if let Ok(val) = std::env::var("IRC_NICK") {
            self.irc.nick = val;
        }
        if let Ok(val) = std::env::var("IRC_USER") {
            self.irc.user = val;
        }
        if let Ok(val) = std::env::var("WEBHOOK_HOST") {
            self.webhook.host = val;
        }
        if let Ok(val) = std::env::var("WEBHOOK_PORT") {
            self.webhook.port = val.trim().parse().map_err(|_| {
                config_error(format!("WEBHOOK_PORT must be a valid port number, got: {}", val))
            })?;
        }
        if let Ok(val) = std::env::var("WEBHOOK_HS_TOKEN") {
            self.webhook.hs_token = Some(val);
        }
        Ok(())
    }

    /// Check required fields and normalise values.
    pub fn validate(&mut self) -> Result<()> {
        require(&self.matrix.homeserver, "matrix.homeserver", "MATRIX_HOMESERVER")?;
        require(
            &self.matrix.homeserver_domain,
            "matrix.homeserver_domain",
            "MATRIX_HOMESERVER_DOMAIN",
        )?;
        require(&self.matrix.token, "matrix.token", "MATRIX_TOKEN")?;
        require(&self.matrix.room_id, "matrix.room_id", "MATRIX_ROOM_ID")?;
        require(&self.irc.server, "irc.server", "IRC_SERVER")?;
        require(&self.irc.channel, "irc.channel", "IRC_CHANNEL")?;
        require(&self.irc.nick, "irc.nick", "IRC_NICK")?;
        if self.bridge.register {
            require(&self.bridge.url, "bridge.url", "BRIDGE_URL")?;
        }

        self.matrix.homeserver = self.matrix.homeserver.trim_end_matches('/').to_string();
        if !self.matrix.homeserver.starts_with("http://")
            && !self.matrix.homeserver.starts_with("https://")
        {
            return Err(config_error(format!(
                "matrix.homeserver must be an http(s) URL, got: {}",
                self.matrix.homeserver
            )));
        }
        if !self.matrix.room_id.starts_with('!') {
            return Err(config_error(format!(
                "matrix.room_id must be a room ID starting with '!', got: {}",
                self.matrix.room_id
            )));
        }
        if !self.irc.channel.starts_with('#') && !self.irc.channel.starts_with('&') {
            return Err(config_error(format!(
                "irc.channel must start with '#' or '&', got: {}",
                self.irc.channel
            )));
        }
        if is_synthetic_nick(&self.irc.nick) {
            return Err(config_error(format!(
                "irc.nick must not use the reserved 'M-' prefix, got: {}",
                self.irc.nick
            )));
        }
        if self.irc.port == 0 {
            return Err(config_error("irc.port must not be 0"));
        }
        if self.irc.user.trim().is_empty() {
            self.irc.user = self.irc.nick.clone();
        }
        Ok(())
    }
}

fn require(value: &str, key: &str, env: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(config_error(format!(
            "{key} is required (set in config.toml or {env} env var)"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r##"
[matrix]
homeserver = "https://matrix.example.org/"
homeserver_domain = "example.org"
token = "as-secret"
room_id = "!room:example.org"

[bridge]
url = "http://bridge.example.org:9000"

[irc]
server = "irc.example.net"
port = "6697"
channel = "#meta"
nick = "matrixbridge"
user = "bridge"
"##;

    #[test]
    fn test_parses_string_port() {
        let config = Config::from_toml(FULL).unwrap();
        assert_eq!(config.irc.port, 6697);
        assert_eq!(config.irc.server_addr(), "irc.example.net:6697");
    }

    #[test]
    fn test_parses_integer_port() {
        let content = FULL.replace("port = \"6697\"", "port = 7000");
        let config = Config::from_toml(&content).unwrap();
        assert_eq!(config.irc.port, 7000);
    }

    #[test]
    fn test_rejects_garbage_port() {
        let content = FULL.replace("port = \"6697\"", "port = \"sixty\"");
        assert!(Config::from_toml(&content).is_err());
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_toml(FULL).unwrap();
        assert_eq!(config.webhook.port, 9000);
        assert_eq!(config.webhook.host, "0.0.0.0");
        assert!(config.webhook.hs_token.is_none());
        assert!(config.bridge.register);
    }

    #[test]
    fn test_validate_trims_homeserver_slash() {
        let mut config = Config::from_toml(FULL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.matrix.homeserver, "https://matrix.example.org");
    }

    #[test]
    fn test_validate_defaults_user_to_nick() {
        let content = FULL.replace("user = \"bridge\"", "");
        let mut config = Config::from_toml(&content).unwrap();
        config.validate().unwrap();
        assert_eq!(config.irc.user, "matrixbridge");
    }

    #[test]
    fn test_validate_requires_token() {
        let content = FULL.replace("token = \"as-secret\"", "");
        let mut config = Config::from_toml(&content).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("matrix.token"));
        assert!(matches!(
            err.downcast_ref::<BridgeError>(),
            Some(BridgeError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_reserved_nick() {
        let content = FULL.replace("nick = \"matrixbridge\"", "nick = \"M-bridge\"");
        let mut config = Config::from_toml(&content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_channel() {
        let content = FULL.replace("channel = \"#meta\"", "channel = \"meta\"");
        let mut config = Config::from_toml(&content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bridge_url_optional_without_registration() {
        let content = FULL
            .replace("url = \"http://bridge.example.org:9000\"", "register = false");
        let mut config = Config::from_toml(&content).unwrap();
        config.validate().unwrap();
        assert!(!config.bridge.register);
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let mut config = Config::from_toml(FULL).unwrap();
        config.webhook.hs_token = Some("hs-secret".to_string());
        let debug = format!("{:?}", config);
        assert!(!debug.contains("as-secret"));
        assert!(!debug.contains("hs-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
