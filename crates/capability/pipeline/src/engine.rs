//! 按键累积读数，达到阈值或定时器触发时整批取出。

use domain::{BatchKey, DevicePolicy, FlushTrigger, FlushedBatch, Reading};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// 批次键的粒度。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchKeyMode {
    #[default]
    Device,
    DeviceAndSensorType,
}

/// 批次引擎
///
/// 追加与"取出并清空"都在同一把锁内完成，这是读数离开批次表的唯一入口，
/// 阈值刷出与定时刷出并发时不会重复发送同一条读数。
pub struct BatchEngine {
    mode: BatchKeyMode,
    slots: Mutex<HashMap<BatchKey, Vec<Reading>>>,
}

impl BatchEngine {
    pub fn new(mode: BatchKeyMode) -> Self {
        Self {
            mode,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn key_for(&self, reading: &Reading) -> BatchKey {
        match self.mode {
            BatchKeyMode::Device => BatchKey::device(reading.device_id.clone()),
            BatchKeyMode::DeviceAndSensorType => {
                BatchKey::device_and_type(reading.device_id.clone(), reading.sensor_type.clone())
            }
        }
    }

    /// 追加一条读数；数量达到 `policy.batch_size` 时返回整批。
    pub async fn accumulate(
        &self,
        key: BatchKey,
        reading: Reading,
        policy: &DevicePolicy,
    ) -> Option<FlushedBatch> {
        let mut slots = self.slots.lock().await;
        let pending = slots.entry(key.clone()).or_default();
        pending.push(reading);
        if pending.len() < policy.batch_size {
            return None;
        }
        let readings = slots.remove(&key).unwrap_or_default();
        Some(FlushedBatch {
            key,
            destination: policy.destination.clone(),
            readings,
            trigger: FlushTrigger::Threshold,
        })
    }

    /// 定时路径：取出所有非空批次。`resolve` 按设备给出当前目的地。
    pub async fn flush_pending<F>(&self, resolve: F) -> Vec<FlushedBatch>
    where
        F: Fn(&str) -> DevicePolicy,
    {
        let drained = {
            let mut slots = self.slots.lock().await;
            std::mem::take(&mut *slots)
        };
        let mut batches: Vec<FlushedBatch> = drained
            .into_iter()
            .filter(|(_, readings)| !readings.is_empty())
            .map(|(key, readings)| FlushedBatch {
                destination: resolve(&key.device_id).destination,
                key,
                readings,
                trigger: FlushTrigger::Timer,
            })
            .collect();
        batches.sort_by(|a, b| a.key.cmp(&b.key));
        batches
    }

    pub async fn pending_len(&self, key: &BatchKey) -> usize {
        self.slots.lock().await.get(key).map(Vec::len).unwrap_or(0)
    }

    pub async fn pending_total(&self) -> usize {
        self.slots.lock().await.values().map(Vec::len).sum()
    }
}

impl Default for BatchEngine {
    fn default() -> Self {
        Self::new(BatchKeyMode::Device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{SourceFormat, Transform};

    fn reading(device_id: &str, sensor_type: &str, value: usize) -> Reading {
        Reading {
            device_id: device_id.to_string(),
            sensor_type: sensor_type.to_string(),
            value: value.to_string(),
            unit: None,
            timestamp: None,
            source_format: SourceFormat::Csv,
        }
    }

    fn policy(batch_size: usize) -> DevicePolicy {
        DevicePolicy::new(Transform::None, batch_size, "storage-1")
    }

    #[tokio::test]
    async fn third_reading_flushes_and_fourth_starts_over() {
        let engine = BatchEngine::default();
        let key = BatchKey::device("WAVY_002");
        for value in 0..2 {
            let flushed = engine
                .accumulate(key.clone(), reading("WAVY_002", "pressao", value), &policy(3))
                .await;
            assert!(flushed.is_none());
        }
        let batch = engine
            .accumulate(key.clone(), reading("WAVY_002", "pressao", 2), &policy(3))
            .await
            .expect("flushed");
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.destination, "storage-1");
        assert_eq!(batch.trigger, FlushTrigger::Threshold);

        let none = engine
            .accumulate(key.clone(), reading("WAVY_002", "pressao", 3), &policy(3))
            .await;
        assert!(none.is_none());
        assert_eq!(engine.pending_len(&key).await, 1);
    }

    #[tokio::test]
    async fn sensor_type_sub_key_separates_batches() {
        let engine = BatchEngine::new(BatchKeyMode::DeviceAndSensorType);
        let a = reading("WAVY_001", "pressao", 1);
        let b = reading("WAVY_001", "temperatura", 2);
        assert_ne!(engine.key_for(&a), engine.key_for(&b));
        assert_eq!(
            BatchEngine::default().key_for(&a),
            BatchEngine::default().key_for(&b)
        );
    }

    #[tokio::test]
    async fn timer_flush_skips_empty_keys() {
        let engine = BatchEngine::default();
        assert!(engine.flush_pending(|_| policy(3)).await.is_empty());
    }
}
