// tests/integration/test_helpers.rs

//! Test helpers: an in-process scripted server speaking RESP over TCP.
//!
//! Each test provides a script closure mapping one received command frame to
//! the reply frames to send back. Out-of-band pushes (pub/sub messages) are
//! injected through a broadcast channel and delivered to every live
//! connection, which is how a subscriber under test receives traffic.

use bytes::BytesMut;
use carnelian::config::{BackoffStrategy, ConnectionConfig, RetryConfig};
use carnelian::core::protocol::{RespFrame, RespFrameCodec};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::codec::{Decoder, Encoder};
use tracing_subscriber::{EnvFilter, prelude::*};

/// Reply sentinel: a script returning this frame makes the server hang up
/// the connection instead of answering, for reconnect tests.
pub const HANGUP: &str = "__hangup__";

pub type Script = Arc<dyn Fn(&RespFrame) -> Vec<RespFrame> + Send + Sync>;

pub struct MockServer {
    addr: SocketAddr,
    push_tx: broadcast::Sender<RespFrame>,
}

impl MockServer {
    /// Binds an ephemeral port and serves `script` on every connection.
    pub async fn start<F>(script: F) -> Self
    where
        F: Fn(&RespFrame) -> Vec<RespFrame> + Send + Sync + 'static,
    {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock server addr");
        let (push_tx, _) = broadcast::channel(64);
        let script: Script = Arc::new(script);

        let accept_push = push_tx.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(serve_connection(
                    stream,
                    script.clone(),
                    accept_push.subscribe(),
                ));
            }
        });

        Self { addr, push_tx }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// A client config pointing at this server, with fast retries so failure
    /// tests stay quick.
    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port: self.addr.port(),
            retry: RetryConfig {
                enabled: true,
                max_attempts: 2,
                backoff: BackoffStrategy::Fixed { millis: 10 },
            },
            ..ConnectionConfig::default()
        }
    }

    /// Delivers a push frame to every live connection.
    pub fn push(&self, frame: RespFrame) {
        let _ = self.push_tx.send(frame);
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    script: Script,
    mut push_rx: broadcast::Receiver<RespFrame>,
) {
    let mut codec = RespFrameCodec;
    let mut read_buf = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            pushed = push_rx.recv() => {
                let Ok(frame) = pushed else { continue };
                if matches!(&frame, RespFrame::SimpleString(s) if s == HANGUP) {
                    let _ = stream.shutdown().await;
                    return;
                }
                if write_frame(&mut stream, &frame).await.is_err() {
                    return;
                }
            }
            read = stream.read_buf(&mut read_buf) => {
                match read {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
                loop {
                    let frame = match codec.decode(&mut read_buf) {
                        Ok(Some(frame)) => frame,
                        Ok(None) => break,
                        Err(_) => return,
                    };
                    for reply in script(&frame) {
                        if matches!(&reply, RespFrame::SimpleString(s) if s == HANGUP) {
                            let _ = stream.shutdown().await;
                            return;
                        }
                        if write_frame(&mut stream, &reply).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

async fn write_frame(stream: &mut TcpStream, frame: &RespFrame) -> std::io::Result<()> {
    let mut buf = BytesMut::new();
    RespFrameCodec
        .encode(frame.clone(), &mut buf)
        .map_err(|_| std::io::Error::other("encode failed"))?;
    stream.write_all(&buf).await?;
    stream.flush().await
}

/// Sets up minimal tracing for tests (ignore error if already initialized).
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

// --- Frame construction shorthand ---

pub fn simple(s: &str) -> RespFrame {
    RespFrame::SimpleString(s.to_string())
}

pub fn bulk(s: &str) -> RespFrame {
    RespFrame::BulkString(bytes::Bytes::copy_from_slice(s.as_bytes()))
}

pub fn int(i: i64) -> RespFrame {
    RespFrame::Integer(i)
}

pub fn arr(frames: Vec<RespFrame>) -> RespFrame {
    RespFrame::Array(frames)
}

pub fn nil() -> RespFrame {
    RespFrame::Null
}

/// A pub/sub data message push.
pub fn push_message(channel: &str, payload: &str) -> RespFrame {
    arr(vec![bulk("message"), bulk(channel), bulk(payload)])
}

/// A pattern-subscription data message push.
pub fn push_pmessage(pattern: &str, channel: &str, payload: &str) -> RespFrame {
    arr(vec![bulk("pmessage"), bulk(pattern), bulk(channel), bulk(payload)])
}

// --- Command inspection shorthand for scripts ---

/// The uppercased command name of a request frame.
pub fn cmd_name(frame: &RespFrame) -> String {
    frame_arg(frame, 0)
        .map(|b| String::from_utf8_lossy(&b).to_uppercase())
        .unwrap_or_default()
}

/// The `i`-th bulk-string element of a request frame.
pub fn frame_arg(frame: &RespFrame, i: usize) -> Option<bytes::Bytes> {
    let RespFrame::Array(parts) = frame else {
        return None;
    };
    match parts.get(i)? {
        RespFrame::BulkString(b) => Some(b.clone()),
        _ => None,
    }
}

/// The number of elements in a request frame.
pub fn frame_len(frame: &RespFrame) -> usize {
    match frame {
        RespFrame::Array(parts) => parts.len(),
        _ => 0,
    }
}

/// Standard handshake and discovery replies for a standalone mock: PING,
/// AUTH, SELECT and `INFO cluster`. Scripts chain this first.
pub fn standalone_basics(frame: &RespFrame) -> Option<Vec<RespFrame>> {
    match cmd_name(frame).as_str() {
        "PING" => Some(vec![simple("PONG")]),
        "AUTH" | "SELECT" => Some(vec![simple("OK")]),
        "INFO" => Some(vec![bulk("# Cluster\r\ncluster_enabled:0\r\n")]),
        _ => None,
    }
}

/// Polls until `cond` holds, panicking after two seconds.
pub async fn wait_until<F>(what: &str, mut cond: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
