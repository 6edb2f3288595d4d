//! # 存储转发
//!
//! 将刷出的批次逐条编码为 JSON，经 TCP 送往存储服务，并等待每条的文本应答。

mod client;
mod error;

pub use client::{DeliveryOutcome, ForwardClient, ForwardConfig};
pub use error::ForwardError;

use domain::Reading;
use serde_json::json;
use tracing::debug;
use wavy_normalize::parse_numeric;

/// 存储服务的记录格式：`wavyId` / `tipo` / `valor` / `unidade` / `data`。
///
/// `valor` 能解析为数值时写数值，否则保留原文。
pub fn encode_reading(reading: &Reading) -> String {
    let valor = match parse_numeric(reading) {
        Ok(number) => json!(number),
        Err(err) => {
            debug!(target: "wavy.forward", device_id = %reading.device_id, error = %err, "value_kept_as_text");
            json!(reading.value)
        }
    };
    json!({
        "wavyId": reading.device_id,
        "tipo": reading.sensor_type,
        "valor": valor,
        "unidade": reading.unit,
        "data": reading.timestamp,
    })
    .to_string()
}
