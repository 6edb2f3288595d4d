//! # 接入端
//!
//! 从传输层取回原始字节与路由提示，交给 [`RawMessageHandler`]。
//! 目前有两种来源：MQTT 主题消费者与带 `HELLO` 握手的 TCP 监听器。

mod mqtt;
mod tcp;

pub use mqtt::{MqttSource, MqttSourceConfig, routing_key_for};
pub use tcp::{SessionReply, TcpFraming, TcpListenerConfig, TcpListenerSource};

use async_trait::async_trait;
use domain::RawMessage;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 接入错误。
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// 单条消息被拒（解析失败等），不影响会话。
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("source error: {0}")]
    Source(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 原始消息处理器。
#[async_trait]
pub trait RawMessageHandler: Send + Sync {
    async fn handle(&self, message: RawMessage) -> Result<(), IngestError>;
}

/// 接入源抽象；`cancel` 触发后尽快返回。
#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        handler: Arc<dyn RawMessageHandler>,
        cancel: CancellationToken,
    ) -> Result<(), IngestError>;
}
