use async_trait::async_trait;
use domain::RawMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use wavy_ingest::{
    IngestError, RawMessageHandler, TcpFraming, TcpListenerConfig, TcpListenerSource,
};

#[derive(Default)]
struct Recording {
    messages: Mutex<Vec<RawMessage>>,
}

#[async_trait]
impl RawMessageHandler for Recording {
    async fn handle(&self, message: RawMessage) -> Result<(), IngestError> {
        self.messages.lock().await.push(message);
        Ok(())
    }
}

async fn start(
    framing: TcpFraming,
) -> (
    std::net::SocketAddr,
    Arc<Recording>,
    CancellationToken,
    tokio::task::JoinHandle<Result<(), IngestError>>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let handler = Arc::new(Recording::default());
    let cancel = CancellationToken::new();
    let source = TcpListenerSource::new(TcpListenerConfig {
        listen_addr: addr.to_string(),
        framing,
        max_connections: 8,
        idle_timeout: Duration::from_secs(5),
    });
    let task = {
        let handler: Arc<dyn RawMessageHandler> = handler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { source.serve(listener, handler, cancel).await })
    };
    (addr, handler, cancel, task)
}

async fn exchange(stream: &mut TcpStream, frame: &str) -> String {
    stream.write_all(frame.as_bytes()).await.expect("write");
    let mut buffer = [0u8; 256];
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buffer))
        .await
        .expect("reply in time")
        .expect("read");
    String::from_utf8_lossy(&buffer[..read]).trim().to_string()
}

#[tokio::test]
async fn chunk_session_handshake_frames_and_end() {
    let (addr, handler, cancel, task) = start(TcpFraming::Chunk).await;
    let mut stream = TcpStream::connect(addr).await.expect("connect");

    assert_eq!(exchange(&mut stream, "HELLO:WAVY_001").await, "HELLO_OK");
    assert_eq!(
        exchange(&mut stream, "WAVY_ID:WAVY_001|TIPO:temperatura|CARAC:21.5 C|HORA:10:00:00").await,
        "ACK"
    );
    assert_eq!(exchange(&mut stream, ":WAVY_001").await, "BYE");

    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.expect("closed");
    assert!(rest.is_empty());

    let messages = handler.messages.lock().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].device_hint.as_deref(), Some("WAVY_001"));
    drop(messages);

    cancel.cancel();
    task.await.expect("join").expect("serve");
}

#[tokio::test]
async fn line_framing_splits_on_newline() {
    let (addr, handler, cancel, task) = start(TcpFraming::Line).await;
    let stream = TcpStream::connect(addr).await.expect("connect");
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    write_half
        .write_all(b"data-before-hello\nHELLO:WAVY_002\nfirst\nsecond\n:WAVY_002\n")
        .await
        .expect("write");

    let mut replies = Vec::new();
    while let Some(line) = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
        .await
        .expect("reply in time")
        .expect("read")
    {
        replies.push(line);
    }
    assert_eq!(
        replies,
        vec!["ERR handshake required", "HELLO_OK", "ACK", "ACK", "BYE"]
    );
    assert_eq!(handler.messages.lock().await.len(), 2);

    cancel.cancel();
    task.await.expect("join").expect("serve");
}

#[tokio::test]
async fn overlong_line_is_refused_and_skipped() {
    let (addr, handler, cancel, task) = start(TcpFraming::Line).await;
    let stream = TcpStream::connect(addr).await.expect("connect");
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let mut payload = b"HELLO:WAVY_003\n".to_vec();
    payload.extend(std::iter::repeat_n(b'7', 64 * 1024));
    payload.extend_from_slice(b"\nafter\n:WAVY_003\n");
    write_half.write_all(&payload).await.expect("write");

    let mut replies = Vec::new();
    while let Some(line) = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
        .await
        .expect("reply in time")
        .expect("read")
    {
        replies.push(line);
    }
    assert_eq!(replies, vec!["HELLO_OK", "ERR frame too long", "ACK", "BYE"]);
    let messages = handler.messages.lock().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].payload, b"after");
    drop(messages);

    cancel.cancel();
    task.await.expect("join").expect("serve");
}

#[tokio::test]
async fn cancel_closes_open_sessions() {
    let (addr, _handler, cancel, task) = start(TcpFraming::Chunk).await;
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    assert_eq!(exchange(&mut stream, "HELLO:WAVY_003").await, "HELLO_OK");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("listener stops")
        .expect("join")
        .expect("serve");
}
