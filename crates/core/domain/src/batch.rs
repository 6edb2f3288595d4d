use crate::data::Reading;
use std::fmt;

/// 批次键：设备，可选再按传感器类型细分。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchKey {
    pub device_id: String,
    pub sensor_type: Option<String>,
}

impl BatchKey {
    pub fn device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            sensor_type: None,
        }
    }

    pub fn device_and_type(device_id: impl Into<String>, sensor_type: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            sensor_type: Some(sensor_type.into()),
        }
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sensor_type {
            Some(sensor_type) => write!(f, "{}/{}", self.device_id, sensor_type),
            None => f.write_str(&self.device_id),
        }
    }
}

/// 触发刷出的原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Threshold,
    Timer,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Threshold => "threshold",
            Self::Timer => "timer",
        }
    }
}

/// 已从批次表中取出、等待投递的批次。
#[derive(Debug, Clone)]
pub struct FlushedBatch {
    pub key: BatchKey,
    pub destination: String,
    /// 保持到达顺序。
    pub readings: Vec<Reading>,
    pub trigger: FlushTrigger,
}

impl FlushedBatch {
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}
