use crate::PolicyError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// 策略来源抽象（行格式文本）。
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// 来源不存在时返回 `Ok(None)`。
    async fn load(&self) -> Result<Option<String>, PolicyError>;

    /// 写回文本，供运维查看。
    async fn persist(&self, contents: &str) -> Result<(), PolicyError>;

    fn describe(&self) -> String;
}

/// 基于本地文件的策略来源。
#[derive(Debug, Clone)]
pub struct FilePolicySource {
    path: PathBuf,
}

impl FilePolicySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PolicySource for FilePolicySource {
    async fn load(&self) -> Result<Option<String>, PolicyError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(PolicyError::SourceUnavailable(format!(
                "{}: {}",
                self.path.display(),
                err
            ))),
        }
    }

    async fn persist(&self, contents: &str) -> Result<(), PolicyError> {
        tokio::fs::write(&self.path, contents)
            .await
            .map_err(|err| PolicyError::Persist(format!("{}: {}", self.path.display(), err)))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
