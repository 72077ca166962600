//! Configuration loading from TOML files
//!
//! Config file is selected via `--config <path>` (default: config/dev.toml).
//! Every section is optional; missing keys take their defaults. The loaded
//! file is checked by `Config::validate`, which names the first bad key.

use crate::domain::types::DeviceNames;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid config key {key}: {reason}")]
    Invalid { key: &'static str, reason: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Lane identifier stamped on egress messages
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "lane-1".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DevicesConfig {
    #[serde(default = "default_device_pos")]
    pub pos: String,
    #[serde(default = "default_device_scale")]
    pub scale: String,
    #[serde(default = "default_device_cv")]
    pub cv: String,
    #[serde(default = "default_device_rfid")]
    pub rfid: String,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            pos: default_device_pos(),
            scale: default_device_scale(),
            cv: default_device_cv(),
            rfid: default_device_rfid(),
        }
    }
}

fn default_device_pos() -> String {
    "device-pos".to_string()
}

fn default_device_scale() -> String {
    "device-scale".to_string()
}

fn default_device_cv() -> String {
    "device-cv-roi".to_string()
}

fn default_device_rfid() -> String {
    "device-rfid-roi".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerConfig {
    /// Allowed relative difference between scanned and weighed bulk weight
    #[serde(default = "default_scale_to_scale_tolerance")]
    pub scale_to_scale_tolerance: f64,
    /// CV-to-scan alignment window; negative disables the time check
    #[serde(default = "default_cv_time_alignment_ms")]
    pub cv_time_alignment_ms: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            scale_to_scale_tolerance: default_scale_to_scale_tolerance(),
            cv_time_alignment_ms: default_cv_time_alignment_ms(),
        }
    }
}

fn default_scale_to_scale_tolerance() -> f64 {
    0.02
}

fn default_cv_time_alignment_ms() -> i64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_file")]
    pub file: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self { file: default_catalog_file() }
    }
}

fn default_catalog_file() -> String {
    "config/products.json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            topic: default_mqtt_topic(),
            username: None,
            password: None,
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topic() -> String {
    "checkout/readings/#".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_broker_bind_address(),
            port: default_broker_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Status HTTP port (0 to disable)
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: default_http_port() }
    }
}

fn default_http_port() -> u16 {
    48095
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotifierConfig {
    /// Suspect list webhook; unset disables HTTP delivery
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    #[serde(default = "default_mqtt_egress_enabled")]
    pub enabled: bool,
    /// Topic for suspect lists (QoS 1)
    #[serde(default = "default_suspects_topic")]
    pub suspects_topic: String,
    /// Topic for current-state snapshots (QoS 0)
    #[serde(default = "default_state_topic")]
    pub state_topic: String,
    /// Topic for periodic metrics snapshots (QoS 0)
    #[serde(default = "default_metrics_topic")]
    pub metrics_topic: String,
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_mqtt_egress_enabled(),
            suspects_topic: default_suspects_topic(),
            state_topic: default_state_topic(),
            metrics_topic: default_metrics_topic(),
        }
    }
}

fn default_mqtt_egress_enabled() -> bool {
    true
}

fn default_suspects_topic() -> String {
    "checkout/suspects".to_string()
}

fn default_state_topic() -> String {
    "checkout/state".to_string()
}

fn default_metrics_topic() -> String {
    "checkout/metrics".to_string()
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
    30
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub devices: DevicesConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    devices: DeviceNames,
    scale_to_scale_tolerance: f64,
    cv_time_alignment_ms: i64,
    catalog_file: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    broker_enabled: bool,
    broker_bind_address: String,
    broker_port: u16,
    http_port: u16,
    notifier_url: Option<String>,
    mqtt_egress_enabled: bool,
    mqtt_egress_suspects_topic: String,
    mqtt_egress_state_topic: String,
    mqtt_egress_metrics_topic: String,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            site_id: toml_config.site.id,
            devices: DeviceNames {
                pos: toml_config.devices.pos,
                scale: toml_config.devices.scale,
                cv: toml_config.devices.cv,
                rfid: toml_config.devices.rfid,
            },
            scale_to_scale_tolerance: toml_config.reconciler.scale_to_scale_tolerance,
            cv_time_alignment_ms: toml_config.reconciler.cv_time_alignment_ms,
            catalog_file: toml_config.catalog.file,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic: toml_config.mqtt.topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            broker_enabled: toml_config.broker.enabled,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            http_port: toml_config.http.port,
            notifier_url: toml_config.notifier.url,
            mqtt_egress_enabled: toml_config.mqtt_egress.enabled,
            mqtt_egress_suspects_topic: toml_config.mqtt_egress.suspects_topic,
            mqtt_egress_state_topic: toml_config.mqtt_egress.state_topic,
            mqtt_egress_metrics_topic: toml_config.mqtt_egress.metrics_topic,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: config_file.to_string(),
        }
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str, config_file: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)
            .with_context(|| format!("Failed to parse config file {}", config_file))?;
        let config = Self::from_toml(toml_config, config_file);
        config.validate().with_context(|| format!("Invalid config file {}", config_file))?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Check each key against its constraint, in file order
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(key: &'static str, reason: &'static str) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid { key, reason })
        }

        if self.site_id.trim().is_empty() {
            return invalid("site.id", "must not be empty");
        }
        if self.devices.pos.trim().is_empty() {
            return invalid("devices.pos", "must not be empty");
        }
        if self.devices.scale.trim().is_empty() {
            return invalid("devices.scale", "must not be empty");
        }
        if self.devices.cv.trim().is_empty() {
            return invalid("devices.cv", "must not be empty");
        }
        if self.devices.rfid.trim().is_empty() {
            return invalid("devices.rfid", "must not be empty");
        }
        let tolerance = self.scale_to_scale_tolerance;
        if !tolerance.is_finite() || !(0.0..1.0).contains(&tolerance) {
            return invalid("reconciler.scale_to_scale_tolerance", "must be in [0, 1)");
        }
        if self.catalog_file.trim().is_empty() {
            return invalid("catalog.file", "must not be empty");
        }
        if self.mqtt_host.trim().is_empty() {
            return invalid("mqtt.host", "must not be empty");
        }
        if self.mqtt_port == 0 {
            return invalid("mqtt.port", "must be greater than 0");
        }
        if self.mqtt_topic.trim().is_empty() {
            return invalid("mqtt.topic", "must not be empty");
        }
        if self.broker_enabled && self.broker_port == 0 {
            return invalid("broker.port", "must be greater than 0 when the broker is enabled");
        }
        if let Some(url) = &self.notifier_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return invalid("notifier.url", "must start with http:// or https://");
            }
        }
        if self.mqtt_egress_suspects_topic.trim().is_empty() {
            return invalid("mqtt_egress.suspects_topic", "must not be empty");
        }
        if self.mqtt_egress_state_topic.trim().is_empty() {
            return invalid("mqtt_egress.state_topic", "must not be empty");
        }
        if self.mqtt_egress_metrics_topic.trim().is_empty() {
            return invalid("mqtt_egress.metrics_topic", "must not be empty");
        }
        if self.metrics_interval_secs == 0 {
            return invalid("metrics.interval_secs", "must be greater than 0");
        }
        Ok(())
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn devices(&self) -> &DeviceNames {
        &self.devices
    }

    pub fn scale_to_scale_tolerance(&self) -> f64 {
        self.scale_to_scale_tolerance
    }

    pub fn cv_time_alignment_ms(&self) -> i64 {
        self.cv_time_alignment_ms
    }

    pub fn catalog_file(&self) -> &str {
        &self.catalog_file
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn broker_enabled(&self) -> bool {
        self.broker_enabled
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn notifier_url(&self) -> Option<&str> {
        self.notifier_url.as_deref()
    }

    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn mqtt_egress_suspects_topic(&self) -> &str {
        &self.mqtt_egress_suspects_topic
    }

    pub fn mqtt_egress_state_topic(&self) -> &str {
        &self.mqtt_egress_state_topic
    }

    pub fn mqtt_egress_metrics_topic(&self) -> &str {
        &self.mqtt_egress_metrics_topic
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the CV alignment window
    pub fn with_cv_time_alignment_ms(mut self, ms: i64) -> Self {
        self.cv_time_alignment_ms = ms;
        self
    }

    /// Builder method for tests to set the bulk scale tolerance
    pub fn with_scale_to_scale_tolerance(mut self, tolerance: f64) -> Self {
        self.scale_to_scale_tolerance = tolerance;
        self
    }
}
