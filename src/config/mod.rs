// config/mod.rs
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub metrics: MetricsSettings,
    pub bridge: BridgeSettings,
    pub link: LinkSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub address: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeSettings {
    pub max_attempts: u8,
    pub reply_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub retry_backoff_ms: u64,
    pub control_topic: String,
    pub status_topic: String,
}

impl BridgeSettings {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            reply_timeout_ms: 2_000,
            connect_timeout_ms: 10_000,
            write_timeout_ms: 2_000,
            retry_backoff_ms: 500,
            control_topic: "triones/control".into(),
            status_topic: "triones/status".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkSettings {
    /// `simulated` or `ble`.
    pub backend: String,
    pub scan_timeout_ms: u64,
    #[serde(default)]
    pub simulated: SimulatedSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimulatedSettings {
    /// Connects that fail for each device before one succeeds.
    #[serde(default)]
    pub flaky_connects: u32,
    /// Devices that never accept a connection.
    #[serde(default)]
    pub unreachable: Vec<String>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let bridge = BridgeSettings::default();
        let settings = Config::builder()
            .set_default("server.address", "0.0.0.0:3000")?
            .set_default("server.max_connections", 100)?
            .set_default("metrics.enabled", false)?
            .set_default("metrics.port", 9000)?
            .set_default("bridge.max_attempts", bridge.max_attempts as i64)?
            .set_default("bridge.reply_timeout_ms", bridge.reply_timeout_ms as i64)?
            .set_default("bridge.connect_timeout_ms", bridge.connect_timeout_ms as i64)?
            .set_default("bridge.write_timeout_ms", bridge.write_timeout_ms as i64)?
            .set_default("bridge.retry_backoff_ms", bridge.retry_backoff_ms as i64)?
            .set_default("bridge.control_topic", bridge.control_topic)?
            .set_default("bridge.status_topic", bridge.status_topic)?
            .set_default("link.backend", "simulated")?
            .set_default("link.scan_timeout_ms", 10_000)?
            .add_source(File::with_name("config/config").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}
