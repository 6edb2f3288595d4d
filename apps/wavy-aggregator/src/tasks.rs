//! 后台定时任务：定时刷出、状态日志。

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wavy_pipeline::{FlushSummary, Pipeline, PipelineError};
use wavy_policy::PolicyResolver;
use wavy_telemetry::{metrics, record_batch_flushed, record_delivery_queue_full, record_timer_flush};

/// 刷出全部未满批次。目的地按刷出时刻的策略解析。
pub async fn flush_once(pipeline: &Pipeline, policies: &PolicyResolver) -> FlushSummary {
    let summary = pipeline
        .flush_pending(|device_id| policies.resolve(device_id))
        .await;
    for _ in 0..summary.batches {
        record_batch_flushed();
        record_timer_flush();
    }
    for err in &summary.rejected {
        if matches!(err, PipelineError::Backpressure(_)) {
            record_delivery_queue_full();
        }
        warn!(target: "wavy.pipeline", error = %err, "timer_flush_enqueue_failed");
    }
    if summary.batches > 0 {
        info!(
            target: "wavy.pipeline",
            batches = summary.batches,
            readings = summary.readings,
            trigger = "timer",
            "pending_batches_flushed"
        );
    }
    summary
}

pub async fn run_flush_timer(
    pipeline: Pipeline,
    policies: Arc<PolicyResolver>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                flush_once(&pipeline, &policies).await;
            }
        }
    }
}

/// 每隔 `every` 输出一次收发计数。
pub async fn run_status_log(every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let snapshot = metrics().snapshot();
                info!(
                    target: "wavy.pipeline",
                    received = snapshot.received,
                    sent = snapshot.items_sent,
                    dropped_invalid = snapshot.dropped_invalid,
                    delivery_failures = snapshot.delivery_failures,
                    "status"
                );
            }
        }
    }
}
