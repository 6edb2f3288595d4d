/// 转发错误（只影响当前这一条读数）。
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("delivery timeout: {0}")]
    Timeout(String),

    #[error("delivery connection failed: {0}")]
    ConnectionFailed(String),

    /// 连接正常关闭但没有应答。
    #[error("empty response from storage")]
    EmptyResponse,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
