//! # 报文规范化
//!
//! 原始字节 → [`Reading`]：
//!
//! 1. 按 [`FormatChain`] 的优先级识别格式并抽取字段；
//! 2. 用路由提示（topic 路由键、连接握手的设备 ID）补齐缺失字段；
//! 3. 校验 `deviceId` / `sensorType` / `value` 非空；
//! 4. 根据设备策略对 `value` 做文本变换（可经外部预处理服务，失败时本地兜底）。
//!
//! 解析从不 panic，总是返回 `Reading` 或带类型的 [`ParseError`]。

mod error;
pub mod formats;
mod preprocess;

pub use error::{ParseError, ParseErrorKind};
pub use formats::{FormatChain, FormatParser, PartialReading};
pub use preprocess::{HttpPreprocessor, PreprocessError, PreprocessOutput, Preprocessor};

use domain::{RawMessage, Reading, SourceFormat, Transform};
use std::sync::Arc;
use tracing::warn;

/// 使用标准解析器链规范化单条报文。
pub fn normalize(raw: &[u8]) -> Result<Reading, ParseError> {
    normalize_with(&FormatChain::standard(), raw, None, None)
}

/// 存储边界处的数值解析。
pub fn parse_numeric(reading: &Reading) -> Result<f64, ParseError> {
    reading
        .numeric_value()
        .ok_or_else(|| ParseError::invalid_numeric(&reading.value))
}

fn normalize_with(
    chain: &FormatChain,
    raw: &[u8],
    routing_key: Option<&str>,
    device_hint: Option<&str>,
) -> Result<Reading, ParseError> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseError::unrecognized("empty payload"));
    }
    let (format, partial) = chain
        .detect(text)
        .ok_or_else(|| ParseError::unrecognized(preview(text)))??;
    finish(partial, format, routing_key, device_hint)
}

fn finish(
    partial: PartialReading,
    source_format: SourceFormat,
    routing_key: Option<&str>,
    device_hint: Option<&str>,
) -> Result<Reading, ParseError> {
    let hint = |value: Option<&str>| value.and_then(formats::non_empty);
    let device_id = partial
        .device_id
        .or_else(|| hint(device_hint))
        .ok_or_else(|| ParseError::missing_field("deviceId"))?;
    let sensor_type = partial
        .sensor_type
        .or_else(|| hint(routing_key))
        .ok_or_else(|| ParseError::missing_field("sensorType"))?;
    let value = partial
        .value
        .ok_or_else(|| ParseError::missing_field("value"))?;
    Ok(Reading {
        device_id,
        sensor_type,
        value,
        unit: partial.unit,
        timestamp: partial.timestamp,
        source_format,
    })
}

fn preview(text: &str) -> String {
    const MAX_CHARS: usize = 64;
    if text.chars().count() <= MAX_CHARS {
        text.to_string()
    } else {
        let head: String = text.chars().take(MAX_CHARS).collect();
        format!("{head}...")
    }
}

/// 变换结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutcome {
    pub reading: Reading,
    /// 外部预处理失败、改用本地变换。
    pub fell_back: bool,
}

/// 规范化入口。
#[derive(Clone, Default)]
pub struct Normalizer {
    chain: FormatChain,
    preprocessor: Option<Arc<dyn Preprocessor>>,
}

impl Normalizer {
    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn Preprocessor>) -> Self {
        self.preprocessor = Some(preprocessor);
        self
    }

    pub fn normalize(&self, raw: &[u8]) -> Result<Reading, ParseError> {
        normalize_with(&self.chain, raw, None, None)
    }

    /// 规范化传输层报文，路由键与握手设备 ID 只用于补齐缺失字段。
    pub fn normalize_message(&self, message: &RawMessage) -> Result<Reading, ParseError> {
        normalize_with(
            &self.chain,
            &message.payload,
            message.routing_key.as_deref(),
            message.device_hint.as_deref(),
        )
    }

    /// 对 `value` 应用设备策略的变换。
    pub async fn apply_transform(&self, reading: Reading, transform: Transform) -> TransformOutcome {
        if transform == Transform::None {
            return TransformOutcome {
                reading,
                fell_back: false,
            };
        }
        if let Some(preprocessor) = &self.preprocessor {
            match preprocessor.process(&reading, transform).await {
                Ok(PreprocessOutput::Value(value)) if !value.trim().is_empty() => {
                    return TransformOutcome {
                        reading: Reading { value, ..reading },
                        fell_back: false,
                    };
                }
                Ok(PreprocessOutput::Reading(processed))
                    if processed.is_valid() && same_identity(&processed, &reading) =>
                {
                    return TransformOutcome {
                        reading: processed,
                        fell_back: false,
                    };
                }
                Ok(_) => {
                    warn!(
                        target: "wavy.normalize",
                        device_id = %reading.device_id,
                        transform = %transform,
                        "preprocess_result_invalid"
                    );
                }
                Err(err) => {
                    warn!(
                        target: "wavy.normalize",
                        device_id = %reading.device_id,
                        transform = %transform,
                        error = %err,
                        "preprocess_failed"
                    );
                }
            }
            return TransformOutcome {
                reading: local_transform(reading, transform),
                fell_back: true,
            };
        }
        TransformOutcome {
            reading: local_transform(reading, transform),
            fell_back: false,
        }
    }
}

/// 策略按设备和类型解析，结构化结果不能改变二者。
fn same_identity(processed: &Reading, original: &Reading) -> bool {
    processed.device_id == original.device_id && processed.sensor_type == original.sensor_type
}

fn local_transform(reading: Reading, transform: Transform) -> Reading {
    let value = transform.apply(&reading.value);
    Reading { value, ..reading }
}
