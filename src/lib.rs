use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, FileFormat};
use serde::Deserialize;

pub mod domain;
pub mod infrastructure;

#[derive(Clone, Debug, Deserialize)]
pub struct YoyakuConfig {
    pub eventstore: Option<EventStore>,
    pub web: Web,
    pub logger: Logger,
    pub scheduling: Scheduling,
}

impl YoyakuConfig {
    /// `yoyaku.toml` と `YOYAKU_` 環境変数から設定を読み込む
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(config::File::with_name("yoyaku").required(false))
            .add_source(
                config::Environment::with_prefix("YOYAKU")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize::<YoyakuConfig>()
    }

    /// TOML文字列から設定を読み込む
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(config::File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize::<YoyakuConfig>()
    }

    fn builder() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("web.bind", "0.0.0.0:8080")?
            .set_default("logger.level", "INFO")?
            .set_default("scheduling.machine_id", 1)?
            .set_default("scheduling.node_id", 1)?
            .set_default("scheduling.dashboard_upcoming_limit", 10)?
            .set_default("scheduling.max_slot_range_days", 62)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct EventStore {
    pub url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Web {
    pub bind: String,
    pub tls: Option<Tls>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Tls {
    pub cert: String,
    pub key: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Logger {
    pub level: Level,
}

#[derive(Clone, Debug, Deserialize)]
pub enum Level {
    TRACE,
    DEBUG,
    INFO,
    WARN,
    ERROR,
}

impl From<&Level> for tracing::Level {
    fn from(value: &Level) -> Self {
        match value {
            Level::TRACE => tracing::Level::TRACE,
            Level::DEBUG => tracing::Level::DEBUG,
            Level::INFO => tracing::Level::INFO,
            Level::WARN => tracing::Level::WARN,
            Level::ERROR => tracing::Level::ERROR,
        }
    }
}

/// スケジューリングエンジンの設定
#[derive(Clone, Debug, Deserialize)]
pub struct Scheduling {
    pub machine_id: i32,
    pub node_id: i32,
    pub dashboard_upcoming_limit: usize,
    pub max_slot_range_days: i64,
}
