//! # 批处理流水线
//!
//! ```text
//! Reading ──► BatchEngine (按键累积) ──► DeliveryQueue ──► DeliveryPool ──► BatchSink
//!                  ▲
//!                  └── 定时刷出（flush_pending）
//! ```
//!
//! 投递失败只记录，不重试、不回灌队列。

mod delivery;
mod engine;

pub use delivery::{DeliveryPool, DeliveryQueue};
pub use engine::{BatchEngine, BatchKeyMode};

use async_trait::async_trait;
use domain::{BatchKey, DevicePolicy, FlushedBatch, Reading};
use std::sync::Arc;

/// 流水线错误。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("backpressure: {0}")]
    Backpressure(String),
    #[error("delivery queue closed")]
    QueueClosed,
}

/// 单条读数的投递结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// 收到非空应答。
    Acknowledged(String),
    Failed(String),
}

/// 一个批次的投递汇总。
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub destination: String,
    pub attempted: usize,
    pub succeeded: usize,
    pub outcomes: Vec<ItemOutcome>,
}

impl DeliveryReport {
    pub fn from_outcomes(destination: impl Into<String>, outcomes: Vec<ItemOutcome>) -> Self {
        let succeeded = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, ItemOutcome::Acknowledged(_)))
            .count();
        Self {
            destination: destination.into(),
            attempted: outcomes.len(),
            succeeded,
            outcomes,
        }
    }
}

/// 批次投递目标抽象。
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn deliver(&self, batch: &FlushedBatch) -> DeliveryReport;
}

/// 单条读数进入流水线后的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    Queued,
    Flushed { key: BatchKey, size: usize },
}

/// 定时刷出汇总。
#[derive(Debug, Default)]
pub struct FlushSummary {
    pub batches: usize,
    pub readings: usize,
    pub rejected: Vec<PipelineError>,
}

/// 流水线入口。
#[derive(Clone)]
pub struct Pipeline {
    engine: Arc<BatchEngine>,
    queue: DeliveryQueue,
}

impl Pipeline {
    pub fn new(engine: Arc<BatchEngine>, queue: DeliveryQueue) -> Self {
        Self { engine, queue }
    }

    pub fn engine(&self) -> &BatchEngine {
        &self.engine
    }

    pub async fn handle(
        &self,
        reading: Reading,
        policy: &DevicePolicy,
    ) -> Result<HandleOutcome, PipelineError> {
        let key = self.engine.key_for(&reading);
        match self.engine.accumulate(key, reading, policy).await {
            None => Ok(HandleOutcome::Queued),
            Some(batch) => {
                let outcome = HandleOutcome::Flushed {
                    key: batch.key.clone(),
                    size: batch.len(),
                };
                self.queue.enqueue(batch)?;
                Ok(outcome)
            }
        }
    }

    pub async fn flush_pending<F>(&self, resolve: F) -> FlushSummary
    where
        F: Fn(&str) -> DevicePolicy,
    {
        let mut summary = FlushSummary::default();
        for batch in self.engine.flush_pending(resolve).await {
            let size = batch.len();
            match self.queue.enqueue(batch) {
                Ok(()) => {
                    summary.batches += 1;
                    summary.readings += size;
                }
                Err(err) => summary.rejected.push(err),
            }
        }
        summary
    }
}
