//! 外部预处理服务（可选）
//!
//! 请求：`POST {url}`，body `{"payload": "<value>", "transform": "<name>"}`。
//! 响应二选一：
//! - `{"payload": "<变换后的值>"}`
//! - `{"reading": {"wavyId": .., "tipo": .., "valor": .., "unidade": .., "hora"|"data": ..}}`

use async_trait::async_trait;
use domain::{Reading, Transform};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 预处理服务错误。
#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("upstream processing failed: {0}")]
    UpstreamFailed(String),
    #[error("client error: {0}")]
    Client(String),
}

/// 预处理结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreprocessOutput {
    /// 仅返回变换后的值。
    Value(String),
    /// 返回完整的规范化记录。
    Reading(Reading),
}

/// 预处理协作方抽象。
#[async_trait]
pub trait Preprocessor: Send + Sync {
    async fn process(
        &self,
        reading: &Reading,
        transform: Transform,
    ) -> Result<PreprocessOutput, PreprocessError>;
}

#[derive(Debug, Serialize)]
struct PreprocessRequest<'a> {
    payload: &'a str,
    transform: &'a str,
}

#[derive(Debug, Deserialize)]
struct PreprocessResponse {
    payload: Option<String>,
    reading: Option<ReadingRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadingRecord {
    wavy_id: Option<String>,
    tipo: Option<String>,
    valor: Option<serde_json::Value>,
    unidade: Option<String>,
    hora: Option<String>,
    data: Option<String>,
}

impl ReadingRecord {
    fn into_reading(self, original: &Reading) -> Reading {
        let value = match self.valor {
            Some(serde_json::Value::String(text)) => text,
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        Reading {
            device_id: self.wavy_id.unwrap_or_default(),
            sensor_type: self.tipo.unwrap_or_default(),
            value,
            unit: self.unidade,
            timestamp: self.hora.or(self.data),
            source_format: original.source_format,
        }
    }
}

/// 基于 HTTP 的预处理客户端。
#[derive(Clone)]
pub struct HttpPreprocessor {
    url: String,
    client: reqwest::Client,
}

impl HttpPreprocessor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, PreprocessError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| PreprocessError::Client(err.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl Preprocessor for HttpPreprocessor {
    async fn process(
        &self,
        reading: &Reading,
        transform: Transform,
    ) -> Result<PreprocessOutput, PreprocessError> {
        let request = PreprocessRequest {
            payload: &reading.value,
            transform: transform.as_str(),
        };
        let response: PreprocessResponse = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| PreprocessError::UpstreamFailed(err.to_string()))?
            .json()
            .await
            .map_err(|err| PreprocessError::UpstreamFailed(err.to_string()))?;

        match (response.reading, response.payload) {
            (Some(record), _) => Ok(PreprocessOutput::Reading(record.into_reading(reading))),
            (None, Some(payload)) => Ok(PreprocessOutput::Value(payload)),
            (None, None) => Err(PreprocessError::UpstreamFailed(
                "empty preprocess response".to_string(),
            )),
        }
    }
}
