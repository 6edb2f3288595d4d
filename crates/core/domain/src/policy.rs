use std::fmt;
use std::str::FromStr;

pub const DEFAULT_BATCH_SIZE: usize = 3;
pub const DEFAULT_DESTINATION: &str = "localhost";

/// 读数值的文本变换。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transform {
    #[default]
    None,
    Uppercase,
    Lowercase,
    /// 去除首尾空白并转小写。
    Normalize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTransform(pub String);

impl fmt::Display for UnknownTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown transform: {}", self.0)
    }
}

impl std::error::Error for UnknownTransform {}

impl Transform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Uppercase => "uppercase",
            Self::Lowercase => "lowercase",
            Self::Normalize => "normalize",
        }
    }

    /// 未知名称按 `None` 处理。
    pub fn from_name_lenient(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }

    /// 幂等：`apply(apply(x)) == apply(x)`。
    pub fn apply(&self, value: &str) -> String {
        match self {
            Self::None => value.to_string(),
            Self::Uppercase => value.to_uppercase(),
            Self::Lowercase => value.to_lowercase(),
            Self::Normalize => value.trim().to_lowercase(),
        }
    }
}

impl FromStr for Transform {
    type Err = UnknownTransform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "uppercase" => Ok(Self::Uppercase),
            "lowercase" => Ok(Self::Lowercase),
            "normalize" => Ok(Self::Normalize),
            other => Err(UnknownTransform(other.to_string())),
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个设备（或系统默认）的处理策略。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePolicy {
    pub transform: Transform,
    /// 恒 >= 1。
    pub batch_size: usize,
    pub destination: String,
}

impl DevicePolicy {
    pub fn new(transform: Transform, batch_size: usize, destination: impl Into<String>) -> Self {
        let destination = destination.into();
        let destination = if destination.trim().is_empty() {
            DEFAULT_DESTINATION.to_string()
        } else {
            destination.trim().to_string()
        };
        Self {
            transform,
            batch_size: batch_size.max(1),
            destination,
        }
    }
}

impl Default for DevicePolicy {
    fn default() -> Self {
        Self::new(Transform::None, DEFAULT_BATCH_SIZE, DEFAULT_DESTINATION)
    }
}
