//! 采集链路装配模块
//!
//! 原始消息依次经过：规范化 → 策略解析 → 文本变换 → 批处理流水线。
//! 解析失败只丢弃当前这条，会话与订阅不受影响。

use domain::RawMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wavy_config::{AppConfig, TcpFraming as ConfiguredFraming};
use wavy_ingest::{
    IngestError, MqttSource, MqttSourceConfig, RawMessageHandler, Source, TcpFraming,
    TcpListenerConfig, TcpListenerSource,
};
use wavy_normalize::Normalizer;
use wavy_pipeline::{HandleOutcome, Pipeline, PipelineError};
use wavy_policy::PolicyResolver;
use wavy_telemetry::{
    record_batch_flushed, record_delivery_queue_full, record_dropped_invalid, record_normalized,
    record_preprocess_fallback, record_received,
};

/// 聚合处理器：所有接入源共享同一个实例。
pub struct AggregatorHandler {
    normalizer: Normalizer,
    policies: Arc<PolicyResolver>,
    pipeline: Pipeline,
}

impl AggregatorHandler {
    pub fn new(normalizer: Normalizer, policies: Arc<PolicyResolver>, pipeline: Pipeline) -> Self {
        Self {
            normalizer,
            policies,
            pipeline,
        }
    }
}

#[async_trait::async_trait]
impl RawMessageHandler for AggregatorHandler {
    async fn handle(&self, message: RawMessage) -> Result<(), IngestError> {
        record_received();
        debug!(
            target: "wavy.ingest",
            routing_key = ?message.routing_key,
            device_hint = ?message.device_hint,
            payload_size = message.payload.len(),
            "raw_message_received"
        );

        // 1. 规范化：识别格式并抽取读数
        let reading = match self.normalizer.normalize_message(&message) {
            Ok(reading) => reading,
            Err(err) => {
                record_dropped_invalid();
                warn!(
                    target: "wavy.ingest",
                    kind = err.kind.as_str(),
                    detail = %err.detail,
                    "normalize_failed"
                );
                return Err(IngestError::Rejected(err.kind.as_str().to_string()));
            }
        };
        record_normalized();

        // 2. 策略解析与文本变换
        let policy = self.policies.resolve(&reading.device_id);
        let outcome = self
            .normalizer
            .apply_transform(reading, policy.transform)
            .await;
        if outcome.fell_back {
            record_preprocess_fallback();
        }
        let reading = outcome.reading;
        info!(
            target: "wavy.ingest",
            device_id = %reading.device_id,
            sensor_type = %reading.sensor_type,
            value = %reading.value,
            format = %reading.source_format,
            transform = %policy.transform,
            "reading_normalized"
        );

        // 3. 累积；达到阈值时整批入投递队列
        match self.pipeline.handle(reading, &policy).await {
            Ok(HandleOutcome::Queued) => {}
            Ok(HandleOutcome::Flushed { key, size }) => {
                record_batch_flushed();
                info!(
                    target: "wavy.pipeline",
                    key = %key,
                    size,
                    destination = %policy.destination,
                    trigger = "threshold",
                    "batch_flushed"
                );
            }
            Err(err) => {
                // 读数已被接收，丢的是投递，不回 ERR 给设备
                if matches!(err, PipelineError::Backpressure(_)) {
                    record_delivery_queue_full();
                }
                warn!(target: "wavy.pipeline", error = %err, "batch_enqueue_failed");
            }
        }
        Ok(())
    }
}

/// 按接入模式构造接入源。
pub fn build_sources(config: &AppConfig) -> Vec<Arc<dyn Source>> {
    let mut sources: Vec<Arc<dyn Source>> = Vec::new();
    if config.ingest_mode.mqtt_enabled() {
        let mqtt_config = MqttSourceConfig {
            host: config.mqtt_host.clone(),
            port: config.mqtt_port,
            username: config.mqtt_username.clone(),
            password: config.mqtt_password.clone(),
            topic_prefix: config.mqtt_topic_prefix.clone(),
            sensor_types: config.sensor_types.clone(),
        };
        info!(
            "ingest source: mqtt {}:{} prefix={}",
            mqtt_config.host, mqtt_config.port, mqtt_config.topic_prefix
        );
        sources.push(Arc::new(MqttSource::new(mqtt_config)));
    }
    if config.ingest_mode.tcp_enabled() {
        let framing = match config.tcp_framing {
            ConfiguredFraming::Chunk => TcpFraming::Chunk,
            ConfiguredFraming::Line => TcpFraming::Line,
        };
        let tcp_config = TcpListenerConfig {
            listen_addr: config.tcp_listen_addr.clone(),
            framing,
            ..TcpListenerConfig::default()
        };
        info!("ingest source: tcp {} framing={:?}", tcp_config.listen_addr, framing);
        sources.push(Arc::new(TcpListenerSource::new(tcp_config)));
    }
    sources
}

/// 启动接入源任务；`cancel` 触发后各任务自行退出。
pub fn spawn_sources(
    sources: Vec<Arc<dyn Source>>,
    handler: Arc<dyn RawMessageHandler>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    sources
        .into_iter()
        .map(|source| {
            let handler = Arc::clone(&handler);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let name = source.name();
                if let Err(err) = source.run(handler, cancel.clone()).await {
                    warn!(target: "wavy.ingest", source = name, error = %err, "ingest_stopped");
                    // 接入源无法恢复时整体退出
                    cancel.cancel();
                }
            })
        })
        .collect()
}

/// 接入任务退出的最长等待时间。
pub const SOURCE_STOP_TIMEOUT: Duration = Duration::from_secs(10);
