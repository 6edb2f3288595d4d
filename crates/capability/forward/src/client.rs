//! 存储层转发客户端
//!
//! 每个批次打开一条 TCP 连接，逐条写入并等待应答；应答非空才算成功。
//! 某条失败后丢弃连接，下一条重新建连。没有重试队列。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let client = ForwardClient::new(ForwardConfig::default());
//! let outcomes = client.deliver("localhost", &readings).await;
//! ```

use crate::error::ForwardError;
use async_trait::async_trait;
use domain::{FlushedBatch, Reading};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use wavy_pipeline::{BatchSink, DeliveryReport, ItemOutcome};
use wavy_telemetry::{record_delivery_failure, record_item_sent};

const RESPONSE_BUFFER_BYTES: usize = 1024;

/// 转发客户端配置
#[derive(Debug, Clone)]
pub struct ForwardConfig {
    /// 存储服务固定端口
    pub port: u16,
    /// 连接、写入、读应答各自的超时
    pub timeout: Duration,
    /// 同一批次相邻两条之间的间隔
    pub pacing: Duration,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            port: 6000,
            timeout: Duration::from_millis(5000),
            pacing: Duration::from_millis(50),
        }
    }
}

/// 单条投递结果。
#[derive(Debug)]
pub enum DeliveryOutcome {
    Acknowledged(String),
    Failed(ForwardError),
}

impl DeliveryOutcome {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Acknowledged(_))
    }
}

/// 存储层转发客户端
#[derive(Debug, Clone)]
pub struct ForwardClient {
    config: ForwardConfig,
}

impl ForwardClient {
    pub fn new(config: ForwardConfig) -> Self {
        Self { config }
    }

    /// 顺序投递，返回与 `readings` 一一对应的结果。
    pub async fn deliver(&self, destination: &str, readings: &[Reading]) -> Vec<DeliveryOutcome> {
        let addr = self.address_for(destination);
        let mut connection: Option<TcpStream> = None;
        let mut outcomes = Vec::with_capacity(readings.len());

        for (index, reading) in readings.iter().enumerate() {
            if index > 0 && !self.config.pacing.is_zero() {
                tokio::time::sleep(self.config.pacing).await;
            }
            let payload = crate::encode_reading(reading);
            match self.deliver_item(&mut connection, &addr, payload.as_bytes()).await {
                Ok(response) => {
                    record_item_sent();
                    debug!(
                        target: "wavy.forward",
                        destination = %addr,
                        device_id = %reading.device_id,
                        response = %response,
                        "item_acknowledged"
                    );
                    outcomes.push(DeliveryOutcome::Acknowledged(response));
                }
                Err(err) => {
                    record_delivery_failure();
                    connection = None;
                    warn!(
                        target: "wavy.forward",
                        destination = %addr,
                        device_id = %reading.device_id,
                        error = %err,
                        "delivery_failed"
                    );
                    outcomes.push(DeliveryOutcome::Failed(err));
                }
            }
        }
        outcomes
    }

    async fn deliver_item(
        &self,
        connection: &mut Option<TcpStream>,
        addr: &str,
        payload: &[u8],
    ) -> Result<String, ForwardError> {
        if connection.is_none() {
            *connection = Some(self.connect(addr).await?);
        }
        let Some(stream) = connection.as_mut() else {
            return Err(ForwardError::ConnectionFailed(addr.to_string()));
        };
        self.exchange(stream, payload).await
    }

    async fn connect(&self, addr: &str) -> Result<TcpStream, ForwardError> {
        match tokio::time::timeout(self.config.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(err)) => Err(ForwardError::ConnectionFailed(format!("{addr}: {err}"))),
            Err(_) => Err(ForwardError::Timeout(format!("connect {addr}"))),
        }
    }

    async fn exchange(&self, stream: &mut TcpStream, payload: &[u8]) -> Result<String, ForwardError> {
        let timeout = self.config.timeout;
        tokio::time::timeout(timeout, async {
            stream.write_all(payload).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| ForwardError::Timeout("write".to_string()))??;

        let mut buffer = [0u8; RESPONSE_BUFFER_BYTES];
        let read = tokio::time::timeout(timeout, stream.read(&mut buffer))
            .await
            .map_err(|_| ForwardError::Timeout("awaiting response".to_string()))??;
        let response = String::from_utf8_lossy(&buffer[..read]).trim().to_string();
        if response.is_empty() {
            return Err(ForwardError::EmptyResponse);
        }
        Ok(response)
    }

    /// 目的地已带端口（`ip:port` 或 `host:port`）时原样使用。
    fn address_for(&self, destination: &str) -> String {
        if has_port(destination) {
            destination.to_string()
        } else {
            format!("{}:{}", destination, self.config.port)
        }
    }
}

fn has_port(destination: &str) -> bool {
    if destination.parse::<SocketAddr>().is_ok() {
        return true;
    }
    // 裸 IPv6 地址含多个冒号，不按 host:port 解读
    match destination.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty() && !host.contains(':') && port.parse::<u16>().is_ok()
        }
        None => false,
    }
}

#[async_trait]
impl BatchSink for ForwardClient {
    async fn deliver(&self, batch: &FlushedBatch) -> DeliveryReport {
        info!(
            target: "wavy.forward",
            key = %batch.key,
            destination = %batch.destination,
            size = batch.len(),
            "batch_forwarding"
        );
        let outcomes = ForwardClient::deliver(self, &batch.destination, &batch.readings)
            .await
            .into_iter()
            .map(|outcome| match outcome {
                DeliveryOutcome::Acknowledged(response) => ItemOutcome::Acknowledged(response),
                DeliveryOutcome::Failed(err) => ItemOutcome::Failed(err.to_string()),
            })
            .collect();
        let report = DeliveryReport::from_outcomes(batch.destination.clone(), outcomes);
        info!(
            target: "wavy.forward",
            key = %batch.key,
            succeeded = report.succeeded,
            attempted = report.attempted,
            "batch_forwarded"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_port_appended_to_host() {
        let client = ForwardClient::new(ForwardConfig::default());
        assert_eq!(client.address_for("localhost"), "localhost:6000");
        assert_eq!(client.address_for("10.0.0.2"), "10.0.0.2:6000");
        assert_eq!(client.address_for("127.0.0.1:7000"), "127.0.0.1:7000");
        assert_eq!(client.address_for("storage.local:7000"), "storage.local:7000");
        assert_eq!(client.address_for("[::1]:7000"), "[::1]:7000");
        assert_eq!(client.address_for("storage.local:http"), "storage.local:http:6000");
    }
}
