//! 追踪初始化、会话 ID 生成与进程内计数器。

use serde::Serialize;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 计数器快照，供状态日志与 `/metrics` 使用。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub normalized: u64,
    pub dropped_invalid: u64,
    pub dropped_filtered: u64,
    pub dropped_backlog: u64,
    pub batches_flushed: u64,
    pub timer_flushes: u64,
    pub items_sent: u64,
    pub delivery_failures: u64,
    pub delivery_queue_full: u64,
    pub policy_reloads: u64,
    pub policy_reload_failures: u64,
    pub preprocess_fallbacks: u64,
}

/// 聚合器运行计数。
#[derive(Default)]
pub struct TelemetryMetrics {
    received: AtomicU64,
    normalized: AtomicU64,
    dropped_invalid: AtomicU64,
    dropped_filtered: AtomicU64,
    dropped_backlog: AtomicU64,
    batches_flushed: AtomicU64,
    timer_flushes: AtomicU64,
    items_sent: AtomicU64,
    delivery_failures: AtomicU64,
    delivery_queue_full: AtomicU64,
    policy_reloads: AtomicU64,
    policy_reload_failures: AtomicU64,
    preprocess_fallbacks: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            normalized: self.normalized.load(Ordering::Relaxed),
            dropped_invalid: self.dropped_invalid.load(Ordering::Relaxed),
            dropped_filtered: self.dropped_filtered.load(Ordering::Relaxed),
            dropped_backlog: self.dropped_backlog.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            timer_flushes: self.timer_flushes.load(Ordering::Relaxed),
            items_sent: self.items_sent.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            delivery_queue_full: self.delivery_queue_full.load(Ordering::Relaxed),
            policy_reloads: self.policy_reloads.load(Ordering::Relaxed),
            policy_reload_failures: self.policy_reload_failures.load(Ordering::Relaxed),
            preprocess_fallbacks: self.preprocess_fallbacks.load(Ordering::Relaxed),
        }
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 为一次 TCP 会话生成 session_id。
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 记录收到的原始消息数。
pub fn record_received() {
    metrics().received.fetch_add(1, Ordering::Relaxed);
}

/// 记录规范化成功数。
pub fn record_normalized() {
    metrics().normalized.fetch_add(1, Ordering::Relaxed);
}

/// 记录解析失败丢弃数。
pub fn record_dropped_invalid() {
    metrics().dropped_invalid.fetch_add(1, Ordering::Relaxed);
}

/// 记录路由键未绑定而丢弃的消息数。
pub fn record_dropped_filtered() {
    metrics().dropped_filtered.fetch_add(1, Ordering::Relaxed);
}

/// 记录某个路由键积压已满而丢弃的消息数。
pub fn record_dropped_backlog() {
    metrics().dropped_backlog.fetch_add(1, Ordering::Relaxed);
}

/// 记录刷出的批次数（阈值与定时器两种触发都算）。
pub fn record_batch_flushed() {
    metrics().batches_flushed.fetch_add(1, Ordering::Relaxed);
}

pub fn record_timer_flush() {
    metrics().timer_flushes.fetch_add(1, Ordering::Relaxed);
}

/// 记录存储层已应答的条数。
pub fn record_item_sent() {
    metrics().items_sent.fetch_add(1, Ordering::Relaxed);
}

pub fn record_delivery_failure() {
    metrics().delivery_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录投递队列已满被丢弃的批次数。
pub fn record_delivery_queue_full() {
    metrics().delivery_queue_full.fetch_add(1, Ordering::Relaxed);
}

pub fn record_policy_reload() {
    metrics().policy_reloads.fetch_add(1, Ordering::Relaxed);
}

pub fn record_policy_reload_failure() {
    metrics()
        .policy_reload_failures
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录预处理服务不可用、改用本地变换的次数。
pub fn record_preprocess_fallback() {
    metrics()
        .preprocess_fallbacks
        .fetch_add(1, Ordering::Relaxed);
}
