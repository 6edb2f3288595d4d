//! 投递队列与固定大小的投递 worker 池。
//!
//! 刷出方只做 `try_send`，永不等待网络 I/O；单个批次由一个 worker
//! 顺序发送，批内顺序保持不变。

use crate::{BatchSink, PipelineError};
use domain::FlushedBatch;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 投递队列的发送端。
#[derive(Clone)]
pub struct DeliveryQueue {
    sender: mpsc::Sender<FlushedBatch>,
}

impl DeliveryQueue {
    /// 非阻塞入队。
    pub fn enqueue(&self, batch: FlushedBatch) -> Result<(), PipelineError> {
        self.sender.try_send(batch).map_err(|err| match err {
            mpsc::error::TrySendError::Full(batch) => PipelineError::Backpressure(format!(
                "delivery queue full, dropped {} readings of {}",
                batch.len(),
                batch.key
            )),
            mpsc::error::TrySendError::Closed(_) => PipelineError::QueueClosed,
        })
    }
}

/// 投递 worker 池。
pub struct DeliveryPool {
    handles: Vec<JoinHandle<()>>,
    closing: CancellationToken,
}

impl DeliveryPool {
    pub fn spawn(
        sink: Arc<dyn BatchSink>,
        workers: usize,
        capacity: usize,
    ) -> (DeliveryQueue, DeliveryPool) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let closing = CancellationToken::new();
        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let sink = sink.clone();
                let receiver = receiver.clone();
                let closing = closing.clone();
                tokio::spawn(async move { run_worker(worker_id, sink, receiver, closing).await })
            })
            .collect();
        (DeliveryQueue { sender }, DeliveryPool { handles, closing })
    }

    /// 通知 worker 排空队列后退出，最多等待 `grace`；超时返回 `false` 并放弃剩余投递。
    pub async fn shutdown(mut self, grace: Duration) -> bool {
        self.closing.cancel();
        let drained = tokio::time::timeout(grace, async {
            for handle in self.handles.iter_mut() {
                let _ = handle.await;
            }
        })
        .await
        .is_ok();
        if !drained {
            warn!(target: "wavy.pipeline", grace_ms = grace.as_millis() as u64, "delivery_shutdown_grace_exceeded");
            for handle in &self.handles {
                handle.abort();
            }
        }
        drained
    }
}

async fn run_worker(
    worker_id: usize,
    sink: Arc<dyn BatchSink>,
    receiver: Arc<Mutex<mpsc::Receiver<FlushedBatch>>>,
    closing: CancellationToken,
) {
    loop {
        let next = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                batch = receiver.recv() => batch,
                _ = closing.cancelled() => receiver.try_recv().ok(),
            }
        };
        let Some(batch) = next else {
            break;
        };
        debug!(
            target: "wavy.pipeline",
            worker_id,
            key = %batch.key,
            size = batch.len(),
            "delivery_started"
        );
        let report = sink.deliver(&batch).await;
        info!(
            target: "wavy.pipeline",
            worker_id,
            key = %batch.key,
            destination = %report.destination,
            trigger = batch.trigger.as_str(),
            succeeded = report.succeeded,
            attempted = report.attempted,
            "batch_delivered"
        );
    }
    debug!(target: "wavy.pipeline", worker_id, "delivery_worker_stopped");
}
