//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Sqlite => "sqlite",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_keep_alive_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicsConfig {
    /// Room entry sensors
    #[serde(default = "default_room_topic")]
    pub room: String,
    /// Exhibit presence sensors
    #[serde(default = "default_exhibit_topic")]
    pub exhibit: String,
    /// Previous-presence channel, subscribed but not processed
    #[serde(default = "default_legacy_topic")]
    pub legacy: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            room: default_room_topic(),
            exhibit: default_exhibit_topic(),
            legacy: default_legacy_topic(),
        }
    }
}

fn default_room_topic() -> String {
    "museum/presence/current".to_string()
}

fn default_exhibit_topic() -> String {
    "museum/room".to_string()
}

fn default_legacy_topic() -> String {
    "museum/presence/previous".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_first_delay_secs")]
    pub first_delay_secs: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            first_delay_secs: default_first_delay_secs(),
            multiplier: default_multiplier(),
            max_delay_secs: default_max_delay_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_first_delay_secs() -> u64 {
    1
}

fn default_multiplier() -> u32 {
    2
}

fn default_max_delay_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    12
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    /// Capacity of the decoded-event channel between link and ingestion
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Shut the process down when the link gives up reconnecting
    #[serde(default = "default_exit_on_give_up")]
    pub exit_on_give_up: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            exit_on_give_up: default_exit_on_give_up(),
        }
    }
}

fn default_channel_capacity() -> usize {
    1000
}

fn default_exit_on_give_up() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomsConfig {
    /// Rooms are numbered 0..count, room 0 is the entrance
    #[serde(default = "default_room_count")]
    pub count: u32,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self { count: default_room_count() }
    }
}

fn default_room_count() -> u32 {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewingConfig {
    /// Detection samples that make up a fully observed hour slot
    #[serde(default = "default_normalization")]
    pub normalization: f64,
}

impl Default for ViewingConfig {
    fn default() -> Self {
        Self { normalization: default_normalization() }
    }
}

fn default_normalization() -> f64 {
    7200.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Hex BLAKE3 digest of the password; takes precedence over `password`
    #[serde(default)]
    pub password_blake3: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: default_http_port(), username: None, password: None, password_blake3: None }
    }
}

fn default_http_port() -> u16 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,
    /// SQLite database file (ignored by the memory backend)
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { backend: default_store_backend(), path: default_store_path() }
    }
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Sqlite
}

fn default_store_path() -> String {
    "data/presence.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Site identifier used as a metrics label
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "museum".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub topics: TopicsConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub rooms: RoomsConfig,
    #[serde(default)]
    pub viewing: ViewingConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_client_id: Option<String>,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_keep_alive_secs: u64,
    room_topic: String,
    exhibit_topic: String,
    legacy_topic: String,
    reconnect_first_delay_secs: u64,
    reconnect_multiplier: u32,
    reconnect_max_delay_secs: u64,
    reconnect_max_attempts: u32,
    channel_capacity: usize,
    exit_on_give_up: bool,
    room_count: u32,
    viewing_normalization: f64,
    http_port: u16,
    http_username: Option<String>,
    http_password_hash: Option<blake3::Hash>,
    store_backend: StoreBackend,
    store_path: String,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_client_id: None,
            mqtt_username: None,
            mqtt_password: None,
            mqtt_keep_alive_secs: default_keep_alive_secs(),
            room_topic: default_room_topic(),
            exhibit_topic: default_exhibit_topic(),
            legacy_topic: default_legacy_topic(),
            reconnect_first_delay_secs: default_first_delay_secs(),
            reconnect_multiplier: default_multiplier(),
            reconnect_max_delay_secs: default_max_delay_secs(),
            reconnect_max_attempts: default_max_attempts(),
            channel_capacity: default_channel_capacity(),
            exit_on_give_up: default_exit_on_give_up(),
            room_count: default_room_count(),
            viewing_normalization: default_normalization(),
            http_port: default_http_port(),
            http_username: None,
            http_password_hash: None,
            store_backend: StoreBackend::Memory,
            store_path: default_store_path(),
            metrics_interval_secs: default_metrics_interval(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from an explicit argument or environment
    pub fn resolve_config_path(arg: Option<&str>) -> String {
        if let Some(path) = arg {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if toml_config.viewing.normalization <= 0.0 {
            anyhow::bail!(
                "viewing.normalization must be positive in {} (got {})",
                path.display(),
                toml_config.viewing.normalization
            );
        }
        if toml_config.link.channel_capacity == 0 {
            anyhow::bail!("link.channel_capacity must be at least 1 in {}", path.display());
        }
        if toml_config.rooms.count == 0 {
            anyhow::bail!("rooms.count must be at least 1 in {}", path.display());
        }

        let http_password_hash = match (&toml_config.http.password_blake3, &toml_config.http.password) {
            (Some(hex), _) => Some(blake3::Hash::from_hex(hex.trim()).map_err(|e| {
                anyhow::anyhow!("http.password_blake3 is not a BLAKE3 hex digest in {}: {e}", path.display())
            })?),
            (None, Some(password)) => Some(blake3::hash(password.as_bytes())),
            (None, None) => None,
        };

        Ok(Self {
            site_id: toml_config.site.id,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_client_id: toml_config.mqtt.client_id,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            mqtt_keep_alive_secs: toml_config.mqtt.keep_alive_secs,
            room_topic: toml_config.topics.room,
            exhibit_topic: toml_config.topics.exhibit,
            legacy_topic: toml_config.topics.legacy,
            reconnect_first_delay_secs: toml_config.reconnect.first_delay_secs,
            reconnect_multiplier: toml_config.reconnect.multiplier,
            reconnect_max_delay_secs: toml_config.reconnect.max_delay_secs,
            reconnect_max_attempts: toml_config.reconnect.max_attempts,
            channel_capacity: toml_config.link.channel_capacity,
            exit_on_give_up: toml_config.link.exit_on_give_up,
            room_count: toml_config.rooms.count,
            viewing_normalization: toml_config.viewing.normalization,
            http_port: toml_config.http.port,
            http_username: toml_config.http.username,
            http_password_hash,
            store_backend: toml_config.store.backend,
            store_path: toml_config.store.path,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration from a path, falling back to defaults on error
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// All topics the link subscribes to
    pub fn topics(&self) -> [&str; 3] {
        [&self.room_topic, &self.exhibit_topic, &self.legacy_topic]
    }

    /// Initial reconnect delay as a duration
    pub fn reconnect_first_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_first_delay_secs)
    }

    /// Reconnect delay cap as a duration
    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_delay_secs)
    }

    /// True when data endpoints require basic auth
    pub fn http_auth_enabled(&self) -> bool {
        self.http_username.is_some() && self.http_password_hash.is_some()
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_client_id(&self) -> Option<&str> {
        self.mqtt_client_id.as_deref()
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn mqtt_keep_alive_secs(&self) -> u64 {
        self.mqtt_keep_alive_secs
    }

    pub fn room_topic(&self) -> &str {
        &self.room_topic
    }

    pub fn exhibit_topic(&self) -> &str {
        &self.exhibit_topic
    }

    pub fn legacy_topic(&self) -> &str {
        &self.legacy_topic
    }

    pub fn reconnect_multiplier(&self) -> u32 {
        self.reconnect_multiplier
    }

    pub fn reconnect_max_attempts(&self) -> u32 {
        self.reconnect_max_attempts
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    pub fn exit_on_give_up(&self) -> bool {
        self.exit_on_give_up
    }

    pub fn room_count(&self) -> u32 {
        self.room_count
    }

    pub fn viewing_normalization(&self) -> f64 {
        self.viewing_normalization
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn http_username(&self) -> Option<&str> {
        self.http_username.as_deref()
    }

    /// BLAKE3 digest of the basic auth password; plaintext is never kept
    pub fn http_password_hash(&self) -> Option<blake3::Hash> {
        self.http_password_hash
    }

    pub fn store_backend(&self) -> StoreBackend {
        self.store_backend
    }

    pub fn store_path(&self) -> &str {
        &self.store_path
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set basic auth credentials
    #[cfg(test)]
    pub fn with_http_auth(mut self, username: &str, password: &str) -> Self {
        self.http_username = Some(username.to_string());
        self.http_password_hash = Some(blake3::hash(password.as_bytes()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mqtt_host(), "localhost");
        assert_eq!(config.mqtt_port(), 1883);
        assert_eq!(config.room_count(), 2);
        assert_eq!(config.viewing_normalization(), 7200.0);
        assert_eq!(config.reconnect_first_delay(), Duration::from_secs(1));
        assert_eq!(config.reconnect_max_delay(), Duration::from_secs(60));
        assert_eq!(config.reconnect_multiplier(), 2);
        assert_eq!(config.reconnect_max_attempts(), 12);
        assert_eq!(config.store_backend(), StoreBackend::Memory);
        assert!(!config.http_auth_enabled());
    }

    #[test]
    fn test_topics_order() {
        let config = Config::default();
        assert_eq!(
            config.topics(),
            ["museum/presence/current", "museum/room", "museum/presence/previous"]
        );
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        assert_eq!(Config::resolve_config_path(Some("config/prod.toml")), "config/prod.toml");
    }

    #[test]
    fn test_http_auth_requires_both_fields() {
        let config = Config::default().with_http_auth("curator", "secret");
        assert!(config.http_auth_enabled());
        assert_eq!(config.http_username(), Some("curator"));
        assert_eq!(config.http_password_hash(), Some(blake3::hash(b"secret")));
    }

    #[test]
    fn test_section_defaults() {
        let reconnect = ReconnectConfig::default();
        assert_eq!(reconnect.first_delay_secs, 1);
        assert_eq!(reconnect.max_delay_secs, 60);
        assert_eq!(reconnect.max_attempts, 12);

        let store = StoreConfig::default();
        assert_eq!(store.backend, StoreBackend::Sqlite);
        assert_eq!(store.path, "data/presence.db");
    }
}
