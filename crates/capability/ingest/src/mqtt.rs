//! MQTT 主题消费者
//!
//! 每种传感器类型订阅一个主题 `{prefix}/{type}`，主题的最后一级即路由键。
//! 连接（含重连）成功后重新订阅；未绑定的路由键直接丢弃并计数。
//!
//! 每个路由键一个 worker 顺序处理消息，轮询循环只负责分发，慢消息不会
//! 拖住其他主题或心跳。某个键积压超过 `KEY_BACKLOG` 时新消息丢弃并计数。

use crate::{IngestError, RawMessageHandler, Source};
use async_trait::async_trait;
use domain::{RawMessage, now_epoch_ms};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, SubscribeFilter};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use wavy_telemetry::{record_dropped_backlog, record_dropped_filtered};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);
const KEY_BACKLOG: usize = 256;

/// MQTT 采集源配置。
#[derive(Debug, Clone)]
pub struct MqttSourceConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    /// 本进程绑定的路由键（传感器类型）。
    pub sensor_types: Vec<String>,
}

/// MQTT 采集源。
#[derive(Debug, Clone)]
pub struct MqttSource {
    config: MqttSourceConfig,
    bound: HashSet<String>,
}

impl MqttSource {
    pub fn new(config: MqttSourceConfig) -> Self {
        let bound = config.sensor_types.iter().cloned().collect();
        Self { config, bound }
    }

    fn filters(&self) -> Vec<SubscribeFilter> {
        let prefix = self.config.topic_prefix.trim_end_matches('/');
        self.config
            .sensor_types
            .iter()
            .map(|sensor_type| {
                SubscribeFilter::new(format!("{prefix}/{sensor_type}"), QoS::AtLeastOnce)
            })
            .collect()
    }

    /// 主题转成消息；路由键未绑定时返回 `None`。
    fn message_for(&self, topic: &str, payload: &[u8]) -> Option<RawMessage> {
        let routing_key = routing_key_for(&self.config.topic_prefix, topic)?;
        if !self.bound.contains(&routing_key) {
            return None;
        }
        Some(RawMessage::new(payload.to_vec()).with_routing_key(routing_key))
    }
}

#[async_trait]
impl Source for MqttSource {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn run(
        &self,
        handler: Arc<dyn RawMessageHandler>,
        cancel: CancellationToken,
    ) -> Result<(), IngestError> {
        let client_id = format!("wavy-aggregator-{}", now_epoch_ms());
        let mut options = MqttOptions::new(client_id, self.config.host.clone(), self.config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) =
            (self.config.username.as_ref(), self.config.password.as_ref())
        {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 10);
        info!(
            target: "wavy.ingest",
            host = %self.config.host,
            port = self.config.port,
            bindings = ?self.config.sensor_types,
            "mqtt_source_starting"
        );

        let mut dispatcher = KeyDispatcher::new(handler);
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = eventloop.poll() => event,
            };
            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    client
                        .subscribe_many(self.filters())
                        .await
                        .map_err(|err| IngestError::Source(err.to_string()))?;
                    info!(target: "wavy.ingest", "mqtt_subscribed");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let Some(message) = self.message_for(&publish.topic, &publish.payload) else {
                        record_dropped_filtered();
                        debug!(target: "wavy.ingest", topic = %publish.topic, "mqtt_topic_filtered");
                        continue;
                    };
                    dispatcher.dispatch(message);
                }
                Ok(_) => {}
                Err(err) => {
                    // 事件循环在下一次 poll 时自动重连。
                    warn!(target: "wavy.ingest", error = %err, "mqtt_connection_error");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                    }
                }
            }
        }

        let _ = client.disconnect().await;
        dispatcher.shutdown().await;
        info!(target: "wavy.ingest", "mqtt_source_stopped");
        Ok(())
    }
}

/// 按路由键把消息分给各自的 worker；同一键内保持到达顺序。
struct KeyDispatcher {
    handler: Arc<dyn RawMessageHandler>,
    workers: HashMap<String, mpsc::Sender<RawMessage>>,
    tracker: TaskTracker,
}

impl KeyDispatcher {
    fn new(handler: Arc<dyn RawMessageHandler>) -> Self {
        Self {
            handler,
            workers: HashMap::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// 不等待处理结果。
    fn dispatch(&mut self, message: RawMessage) {
        let key = message.routing_key.clone().unwrap_or_default();
        if !self.workers.contains_key(&key) {
            let sender = self.spawn_worker(&key);
            self.workers.insert(key.clone(), sender);
        }
        let Some(sender) = self.workers.get(&key) else {
            return;
        };
        match sender.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                record_dropped_backlog();
                warn!(target: "wavy.ingest", routing_key = %key, "mqtt_key_backlog_full");
            }
            Err(TrySendError::Closed(_)) => {
                warn!(target: "wavy.ingest", routing_key = %key, "mqtt_key_worker_gone");
                self.workers.remove(&key);
            }
        }
    }

    fn spawn_worker(&self, key: &str) -> mpsc::Sender<RawMessage> {
        let (sender, mut receiver) = mpsc::channel::<RawMessage>(KEY_BACKLOG);
        let handler = self.handler.clone();
        let key = key.to_string();
        self.tracker.spawn(async move {
            while let Some(message) = receiver.recv().await {
                if let Err(err) = handler.handle(message).await {
                    debug!(target: "wavy.ingest", routing_key = %key, error = %err, "mqtt_message_rejected");
                }
            }
        });
        sender
    }

    /// 关闭各键队列，等 worker 处理完已收下的消息。
    async fn shutdown(self) {
        drop(self.workers);
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// 取前缀之后的单级主题作为路由键。
pub fn routing_key_for(prefix: &str, topic: &str) -> Option<String> {
    let prefix = prefix.trim_matches('/');
    let topic = topic.trim_matches('/');
    let rest = if prefix.is_empty() {
        topic
    } else {
        topic.strip_prefix(prefix)?.strip_prefix('/')?
    };
    if rest.is_empty() || rest.contains('/') {
        return None;
    }
    Some(rest.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> MqttSource {
        MqttSource::new(MqttSourceConfig {
            host: "127.0.0.1".to_string(),
            port: 1883,
            username: None,
            password: None,
            topic_prefix: "sensores".to_string(),
            sensor_types: vec!["temperatura".to_string(), "pressao".to_string()],
        })
    }

    #[test]
    fn routing_key_is_last_level() {
        assert_eq!(
            routing_key_for("sensores", "sensores/temperatura").as_deref(),
            Some("temperatura")
        );
        assert_eq!(routing_key_for("", "corrente").as_deref(), Some("corrente"));
        assert_eq!(routing_key_for("sensores", "sensores/a/b"), None);
        assert_eq!(routing_key_for("sensores", "outros/temperatura"), None);
        assert_eq!(routing_key_for("sensores", "sensorestemperatura"), None);
    }

    #[test]
    fn unbound_routing_key_is_filtered() {
        let source = source();
        let message = source
            .message_for("sensores/temperatura", b"payload")
            .expect("bound");
        assert_eq!(message.routing_key.as_deref(), Some("temperatura"));
        assert!(source.message_for("sensores/salinidade", b"payload").is_none());
    }

    struct Gated {
        gate: tokio::sync::Semaphore,
        handled: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RawMessageHandler for Gated {
        async fn handle(&self, message: RawMessage) -> Result<(), IngestError> {
            let key = message.routing_key.clone().unwrap_or_default();
            if key == "temperatura" {
                self.gate.acquire().await.expect("gate").forget();
            }
            let payload = String::from_utf8_lossy(&message.payload).into_owned();
            self.handled.lock().expect("lock").push(payload);
            Ok(())
        }
    }

    fn keyed(key: &str, payload: &str) -> RawMessage {
        RawMessage::new(payload.as_bytes().to_vec()).with_routing_key(key)
    }

    #[tokio::test]
    async fn slow_key_does_not_block_other_keys() {
        let handler = Arc::new(Gated {
            gate: tokio::sync::Semaphore::new(0),
            handled: std::sync::Mutex::new(Vec::new()),
        });
        let mut dispatcher = KeyDispatcher::new(handler.clone());
        dispatcher.dispatch(keyed("temperatura", "t1"));
        dispatcher.dispatch(keyed("temperatura", "t2"));
        dispatcher.dispatch(keyed("pressao", "p1"));

        tokio::time::timeout(Duration::from_secs(2), async {
            while handler.handled.lock().expect("lock").is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("other key handled while one is blocked");
        assert_eq!(*handler.handled.lock().expect("lock"), vec!["p1"]);

        handler.gate.add_permits(2);
        tokio::time::timeout(Duration::from_secs(2), dispatcher.shutdown())
            .await
            .expect("drained");
        assert_eq!(*handler.handled.lock().expect("lock"), vec!["p1", "t1", "t2"]);
    }

    #[test]
    fn one_filter_per_binding() {
        let filters = source().filters();
        let paths: Vec<_> = filters.iter().map(|filter| filter.path.as_str()).collect();
        assert_eq!(paths, vec!["sensores/temperatura", "sensores/pressao"]);
    }
}
