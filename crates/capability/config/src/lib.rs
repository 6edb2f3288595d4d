//! 聚合器运行配置加载。
//!
//! 全部来自 `WAVY_` 前缀的环境变量，均有默认值；格式非法时报错而不是静默回退。

use std::env;
use std::str::FromStr;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 启用哪些接入端。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    Mqtt,
    Tcp,
    Both,
}

impl IngestMode {
    pub fn mqtt_enabled(self) -> bool {
        matches!(self, Self::Mqtt | Self::Both)
    }

    pub fn tcp_enabled(self) -> bool {
        matches!(self, Self::Tcp | Self::Both)
    }
}

impl FromStr for IngestMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mqtt" => Ok(Self::Mqtt),
            "tcp" => Ok(Self::Tcp),
            "both" => Ok(Self::Both),
            other => Err(other.to_string()),
        }
    }
}

/// TCP 会话的分帧方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpFraming {
    /// 每次读取到的数据块即一帧（设备发一帧等一次应答）。
    Chunk,
    /// 以换行分隔。
    Line,
}

impl FromStr for TcpFraming {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "chunk" => Ok(Self::Chunk),
            "line" => Ok(Self::Line),
            other => Err(other.to_string()),
        }
    }
}

/// 聚合器运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ingest_mode: IngestMode,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic_prefix: String,
    pub sensor_types: Vec<String>,
    pub tcp_listen_addr: String,
    pub tcp_framing: TcpFraming,
    pub policy_path: String,
    pub policy_reload_seconds: u64,
    pub flush_interval_seconds: u64,
    pub batch_by_sensor_type: bool,
    pub storage_port: u16,
    pub delivery_timeout_ms: u64,
    pub delivery_pacing_ms: u64,
    pub delivery_workers: usize,
    pub delivery_queue_capacity: usize,
    pub preprocess_url: Option<String>,
    pub http_addr: Option<String>,
    pub shutdown_grace_seconds: u64,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let ingest_mode = read_parsed_with_default("WAVY_INGEST_MODE", IngestMode::Mqtt)?;
        let mqtt_host = env::var("WAVY_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = read_u16_with_default("WAVY_MQTT_PORT", 1883)?;
        let mqtt_username = read_optional("WAVY_MQTT_USERNAME");
        let mqtt_password = read_optional("WAVY_MQTT_PASSWORD");
        let mqtt_topic_prefix = env::var("WAVY_MQTT_TOPIC_PREFIX")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| "sensores".to_string());
        let sensor_types = read_list_with_default(
            "WAVY_SENSOR_TYPES",
            &["pressao", "temperatura", "salinidade", "corrente"],
        )?;
        let tcp_listen_addr =
            env::var("WAVY_TCP_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:5000".to_string());
        let tcp_framing = read_parsed_with_default("WAVY_TCP_FRAMING", TcpFraming::Chunk)?;
        let policy_path = env::var("WAVY_POLICY_PATH").unwrap_or_else(|_| "config.csv".to_string());
        let policy_reload_seconds = read_positive_u64("WAVY_POLICY_RELOAD_SECONDS", 10)?;
        let flush_interval_seconds = read_positive_u64("WAVY_FLUSH_INTERVAL_SECONDS", 30)?;
        let batch_by_sensor_type = read_bool_with_default("WAVY_BATCH_BY_SENSOR_TYPE", false);
        let storage_port = read_u16_with_default("WAVY_STORAGE_PORT", 6000)?;
        let delivery_timeout_ms = read_positive_u64("WAVY_DELIVERY_TIMEOUT_MS", 5000)?;
        let delivery_pacing_ms = read_u64_with_default("WAVY_DELIVERY_PACING_MS", 50)?;
        let delivery_workers = read_positive_u64("WAVY_DELIVERY_WORKERS", 4)? as usize;
        let delivery_queue_capacity =
            read_positive_u64("WAVY_DELIVERY_QUEUE_CAPACITY", 1024)? as usize;
        let preprocess_url = read_optional("WAVY_PREPROCESS_URL");
        let http_addr = read_optional("WAVY_HTTP_ADDR");
        let shutdown_grace_seconds = read_u64_with_default("WAVY_SHUTDOWN_GRACE_SECONDS", 5)?;

        Ok(Self {
            ingest_mode,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_topic_prefix,
            sensor_types,
            tcp_listen_addr,
            tcp_framing,
            policy_path,
            policy_reload_seconds,
            flush_interval_seconds,
            batch_by_sensor_type,
            storage_port,
            delivery_timeout_ms,
            delivery_pacing_ms,
            delivery_workers,
            delivery_queue_capacity,
            preprocess_url,
            http_addr,
            shutdown_grace_seconds,
        })
    }
}

fn read_parsed_with_default<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) if value.trim().is_empty() => Ok(default),
        Ok(value) => value
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid(key.to_string(), value)),
        Err(_) => Ok(default),
    }
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

/// 间隔、超时与容量不允许为 0。
fn read_positive_u64(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = read_u64_with_default(key, default)?;
    if value == 0 {
        return Err(ConfigError::Invalid(key.to_string(), "0".to_string()));
    }
    Ok(value)
}

/// 逗号分隔列表，去空白、去空项；结果为空视为非法。
fn read_list_with_default(key: &str, default: &[&str]) -> Result<Vec<String>, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default.iter().map(|item| item.to_string()).collect()),
    };
    let items: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();
    if items.is_empty() {
        return Err(ConfigError::Invalid(key.to_string(), value));
    }
    Ok(items)
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
