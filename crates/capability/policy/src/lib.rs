//! 设备策略解析与热重载。

mod resolver;
mod source;
mod table;

pub use resolver::PolicyResolver;
pub use source::{FilePolicySource, PolicySource};
pub use table::{BOOTSTRAP_POLICY_FILE, ParseStats, PolicyTable};

/// 策略错误。
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("policy source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("policy persist failed: {0}")]
    Persist(String),
}
