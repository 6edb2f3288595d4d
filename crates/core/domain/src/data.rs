use std::fmt;

/// 传输层送达的原始报文。
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub payload: Vec<u8>,
    /// 路由键（MQTT topic 末段），即传感器类型提示。
    pub routing_key: Option<String>,
    /// 连接握手（`HELLO:<deviceId>`）得到的设备标识。
    pub device_hint: Option<String>,
    pub received_at_ms: i64,
}

impl RawMessage {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            routing_key: None,
            device_hint: None,
            received_at_ms: now_epoch_ms(),
        }
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    pub fn with_device_hint(mut self, device_id: impl Into<String>) -> Self {
        self.device_hint = Some(device_id.into());
        self
    }
}

/// 报文来源格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    Json,
    Xml,
    Csv,
    DelimitedText,
    LegacyPipe,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Csv => "csv",
            Self::DelimitedText => "delimited_text",
            Self::LegacyPipe => "legacy_pipe",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 规范化后的单条读数。
///
/// `value` 保留原始文本，数值解析推迟到存储边界。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub device_id: String,
    pub sensor_type: String,
    pub value: String,
    pub unit: Option<String>,
    /// 设备本地时间（时分秒或日期），原样保留。
    pub timestamp: Option<String>,
    pub source_format: SourceFormat,
}

impl Reading {
    /// 三个必填字段均非空时才是有效读数。
    pub fn is_valid(&self) -> bool {
        !self.device_id.trim().is_empty()
            && !self.sensor_type.trim().is_empty()
            && !self.value.trim().is_empty()
    }

    /// 按数值解读 `value`（兼容逗号小数点）。
    pub fn numeric_value(&self) -> Option<f64> {
        let text = self.value.trim().replace(',', ".");
        text.parse::<f64>().ok().filter(|value| value.is_finite())
    }
}

/// 获取当前时间戳（毫秒）。
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
