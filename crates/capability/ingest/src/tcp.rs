//! TCP 监听器
//!
//! 会话协议：
//! - `HELLO:<deviceId>` 握手，应答 `HELLO_OK`
//! - 之后每帧交给处理器，成功应答 `ACK`，失败应答 `ERR <原因>`
//! - `:<deviceId>` 结束会话，应答 `BYE` 后关闭连接
//!
//! 握手前收到的数据帧一律 `ERR`，会话不中断。按行分帧时单行最多
//! `CHUNK_BYTES` 字节，超长的行整行丢弃并应答 `ERR frame too long`。每个连接一个任务，
//! 连接数受信号量限制，超限的连接直接关闭。

use crate::{IngestError, RawMessageHandler, Source};
use async_trait::async_trait;
use domain::RawMessage;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, warn};
use wavy_telemetry::new_session_id;

const CHUNK_BYTES: usize = 4096;
const HELLO_PREFIX: &str = "HELLO:";

/// 分帧方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TcpFraming {
    /// 一次读取即一帧；设备每发一帧等待一次应答。
    #[default]
    Chunk,
    /// 换行分隔。
    Line,
}

/// TCP 监听器配置
#[derive(Debug, Clone)]
pub struct TcpListenerConfig {
    pub listen_addr: String,
    pub framing: TcpFraming,
    /// 最大并发会话数
    pub max_connections: usize,
    /// 会话空闲超时
    pub idle_timeout: Duration,
}

impl Default for TcpListenerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5000".to_string(),
            framing: TcpFraming::Chunk,
            max_connections: 256,
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// 回给设备的应答。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionReply {
    HelloOk,
    Ack,
    Bye,
    Error(String),
}

impl SessionReply {
    pub fn to_wire(&self) -> String {
        match self {
            Self::HelloOk => "HELLO_OK\n".to_string(),
            Self::Ack => "ACK\n".to_string(),
            Self::Bye => "BYE\n".to_string(),
            Self::Error(reason) => format!("ERR {reason}\n"),
        }
    }
}

struct SessionStep {
    reply: SessionReply,
    close: bool,
}

/// 单个会话的握手状态。
#[derive(Debug, Default)]
struct Session {
    device_id: Option<String>,
}

impl Session {
    /// 空帧返回 `None`（不应答）。
    async fn on_frame(
        &mut self,
        frame: &str,
        handler: &dyn RawMessageHandler,
    ) -> Option<SessionStep> {
        let frame = frame.trim();
        if frame.is_empty() {
            return None;
        }

        if let Some(device_id) = frame.strip_prefix(HELLO_PREFIX) {
            let device_id = device_id.trim();
            if device_id.is_empty() {
                return Some(reply(SessionReply::Error("missing device id".to_string())));
            }
            info!(target: "wavy.ingest", device_id = %device_id, "tcp_session_hello");
            self.device_id = Some(device_id.to_string());
            return Some(reply(SessionReply::HelloOk));
        }

        if let Some(device_id) = frame.strip_prefix(':') {
            if self.device_id.as_deref() != Some(device_id.trim()) {
                debug!(
                    target: "wavy.ingest",
                    expected = ?self.device_id,
                    got = %device_id,
                    "tcp_session_end_mismatch"
                );
            }
            return Some(SessionStep {
                reply: SessionReply::Bye,
                close: true,
            });
        }

        let Some(device_id) = self.device_id.as_deref() else {
            return Some(reply(SessionReply::Error("handshake required".to_string())));
        };
        let message = RawMessage::new(frame.as_bytes()).with_device_hint(device_id);
        match handler.handle(message).await {
            Ok(()) => Some(reply(SessionReply::Ack)),
            Err(IngestError::Rejected(reason)) => Some(reply(SessionReply::Error(reason))),
            Err(err) => Some(reply(SessionReply::Error(err.to_string()))),
        }
    }
}

fn reply(reply: SessionReply) -> SessionStep {
    SessionStep {
        reply,
        close: false,
    }
}

/// TCP 监听采集源
#[derive(Debug, Clone)]
pub struct TcpListenerSource {
    config: TcpListenerConfig,
}

impl TcpListenerSource {
    pub fn new(config: TcpListenerConfig) -> Self {
        Self { config }
    }

    /// 在已绑定的监听器上服务，直到 `cancel` 触发并且所有会话结束。
    pub async fn serve(
        &self,
        listener: TcpListener,
        handler: Arc<dyn RawMessageHandler>,
        cancel: CancellationToken,
    ) -> Result<(), IngestError> {
        let limit = Arc::new(Semaphore::new(self.config.max_connections.max(1)));
        let sessions = TaskTracker::new();
        info!(
            target: "wavy.ingest",
            addr = ?listener.local_addr().ok(),
            framing = ?self.config.framing,
            "tcp_listener_started"
        );

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(target: "wavy.ingest", error = %err, "tcp_accept_failed");
                    continue;
                }
            };
            let Ok(permit) = limit.clone().try_acquire_owned() else {
                warn!(target: "wavy.ingest", peer = %peer, "tcp_connection_limit_reached");
                continue;
            };

            let span = info_span!(
                target: "wavy.ingest",
                "tcp_session",
                session_id = %new_session_id(),
                peer = %peer
            );
            let handler = Arc::clone(&handler);
            let config = self.config.clone();
            let cancel = cancel.clone();
            sessions.spawn(
                async move {
                    let _permit = permit;
                    if let Err(err) = handle_connection(stream, peer, handler, &config, cancel).await {
                        warn!(target: "wavy.ingest", error = %err, "tcp_session_failed");
                    }
                }
                .instrument(span),
            );
        }

        sessions.close();
        sessions.wait().await;
        info!(target: "wavy.ingest", "tcp_listener_stopped");
        Ok(())
    }
}

#[async_trait]
impl Source for TcpListenerSource {
    fn name(&self) -> &'static str {
        "tcp"
    }

    async fn run(
        &self,
        handler: Arc<dyn RawMessageHandler>,
        cancel: CancellationToken,
    ) -> Result<(), IngestError> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        self.serve(listener, handler, cancel).await
    }
}

/// 处理单个连接
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn RawMessageHandler>,
    config: &TcpListenerConfig,
    cancel: CancellationToken,
) -> Result<(), IngestError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut buffer = vec![0u8; CHUNK_BYTES];
    let mut session = Session::default();
    debug!(target: "wavy.ingest", peer = %peer, "tcp_session_opened");

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = tokio::time::timeout(
                config.idle_timeout,
                next_frame(&mut reader, config.framing, &mut buffer),
            ) => read,
        };
        let frame = match read {
            Err(_) => {
                info!(target: "wavy.ingest", "tcp_session_idle_timeout");
                break;
            }
            Ok(Ok(None)) => break,
            Ok(Ok(Some(Frame::Data(frame)))) => frame,
            Ok(Ok(Some(Frame::Oversized))) => {
                warn!(target: "wavy.ingest", limit = CHUNK_BYTES, "tcp_frame_too_long");
                let reply = SessionReply::Error("frame too long".to_string());
                write_half.write_all(reply.to_wire().as_bytes()).await?;
                continue;
            }
            Ok(Err(err)) => return Err(err.into()),
        };

        let Some(step) = session.on_frame(&frame, handler.as_ref()).await else {
            continue;
        };
        write_half.write_all(step.reply.to_wire().as_bytes()).await?;
        if step.close {
            break;
        }
    }

    debug!(target: "wavy.ingest", device_id = ?session.device_id, "tcp_session_closed");
    Ok(())
}

enum Frame {
    Data(String),
    /// 读满上限仍未见换行。
    Oversized,
}

/// 读取下一帧；对端关闭时返回 `None`。
async fn next_frame(
    reader: &mut BufReader<OwnedReadHalf>,
    framing: TcpFraming,
    buffer: &mut [u8],
) -> std::io::Result<Option<Frame>> {
    match framing {
        TcpFraming::Line => {
            let mut line = Vec::new();
            let read = (&mut *reader)
                .take(CHUNK_BYTES as u64)
                .read_until(b'\n', &mut line)
                .await?;
            if read == 0 {
                return Ok(None);
            }
            if read >= CHUNK_BYTES && !line.ends_with(b"\n") {
                discard_line(reader, &mut line).await?;
                return Ok(Some(Frame::Oversized));
            }
            Ok(Some(Frame::Data(String::from_utf8_lossy(&line).into_owned())))
        }
        TcpFraming::Chunk => {
            let read = reader.read(buffer).await?;
            if read == 0 {
                return Ok(None);
            }
            Ok(Some(Frame::Data(
                String::from_utf8_lossy(&buffer[..read]).into_owned(),
            )))
        }
    }
}

/// 丢弃到下一个换行（或连接结束），内存占用不超过一块。
async fn discard_line(reader: &mut BufReader<OwnedReadHalf>, scratch: &mut Vec<u8>) -> std::io::Result<()> {
    loop {
        scratch.clear();
        let read = (&mut *reader)
            .take(CHUNK_BYTES as u64)
            .read_until(b'\n', scratch)
            .await?;
        if read == 0 || scratch.ends_with(b"\n") {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        messages: Mutex<Vec<RawMessage>>,
    }

    #[async_trait]
    impl RawMessageHandler for Recording {
        async fn handle(&self, message: RawMessage) -> Result<(), IngestError> {
            if message.payload == b"bad" {
                return Err(IngestError::Rejected("unrecognized_format".to_string()));
            }
            self.messages.lock().expect("lock").push(message);
            Ok(())
        }
    }

    #[tokio::test]
    async fn frames_before_hello_are_rejected() {
        let handler = Recording::default();
        let mut session = Session::default();
        let step = session.on_frame("WAVY_001,temperatura,1,C,10:00:00", &handler).await;
        assert_eq!(
            step.map(|step| step.reply),
            Some(SessionReply::Error("handshake required".to_string()))
        );
        assert!(handler.messages.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn session_flow_attaches_device_hint() {
        let handler = Recording::default();
        let mut session = Session::default();

        let hello = session.on_frame("HELLO:WAVY_007\r\n", &handler).await.expect("step");
        assert_eq!(hello.reply, SessionReply::HelloOk);
        assert!(session.on_frame("   ", &handler).await.is_none());

        let ack = session.on_frame("payload", &handler).await.expect("step");
        assert_eq!(ack.reply, SessionReply::Ack);
        let err = session.on_frame("bad", &handler).await.expect("step");
        assert_eq!(err.reply, SessionReply::Error("unrecognized_format".to_string()));

        let bye = session.on_frame(":WAVY_007", &handler).await.expect("step");
        assert_eq!(bye.reply, SessionReply::Bye);
        assert!(bye.close);

        let messages = handler.messages.lock().expect("lock");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].device_hint.as_deref(), Some("WAVY_007"));
    }

    #[tokio::test]
    async fn empty_hello_is_an_error() {
        let handler = Recording::default();
        let mut session = Session::default();
        let step = session.on_frame("HELLO:", &handler).await.expect("step");
        assert!(matches!(step.reply, SessionReply::Error(_)));
        assert!(session.device_id.is_none());
    }
}
