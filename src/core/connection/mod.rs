// src/core/connection/mod.rs

//! A single connection to one server node: socket ownership, liveness
//! tracking, handshake, reconnection, and the request/reply primitives
//! everything else is built on.
//!
//! All writes and synchronous write/read pairs are serialized by one
//! per-connection async mutex. While a subscription loop is running it holds
//! that mutex for the whole subscribed period; other callers are rejected
//! up front by the `is_subscribed` flag without ever touching the socket.

mod stream;

pub use stream::RespStream;

use crate::config::ConnectionConfig;
use crate::core::ClientError;
use crate::core::protocol::{RespFrame, RespFrameCodec, command};
use crate::core::pubsub::{SubscriptionKind, SubscriptionSets};
use bytes::{Bytes, BytesMut};
use futures::FutureExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

/// Liveness of a connection. `Ready` is strictly the post-handshake state
/// with no IO error observed since.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Opening = 0,
    Ready = 1,
    Closing = 2,
    Closed = 3,
    Broken = 4,
}

impl From<u8> for ConnectionState {
    fn from(v: u8) -> Self {
        match v {
            0 => ConnectionState::Opening,
            1 => ConnectionState::Ready,
            2 => ConnectionState::Closing,
            3 => ConnectionState::Closed,
            _ => ConnectionState::Broken,
        }
    }
}

/// The socket-side state guarded by the connection mutex.
#[derive(Debug)]
pub(crate) struct ConnIo {
    stream: Option<RespStream>,
    read_buf: BytesMut,
    codec: RespFrameCodec,
    /// True between a write and the completion of its matching read. A caller
    /// cancelled in that window leaves the reply stream indeterminate; the
    /// next user of the connection must reconnect before trusting it.
    inflight: bool,
}

impl ConnIo {
    fn empty() -> Self {
        Self {
            stream: None,
            read_buf: BytesMut::with_capacity(4096),
            codec: RespFrameCodec,
            inflight: false,
        }
    }

    fn replace_stream(&mut self, stream: RespStream) {
        self.stream = Some(stream);
        self.read_buf.clear();
        self.inflight = false;
    }

    fn live_stream(&mut self) -> Result<&mut RespStream, ClientError> {
        self.stream
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)
    }

    pub(crate) async fn write_frame(&mut self, frame: &RespFrame) -> Result<(), ClientError> {
        let mut buf = BytesMut::new();
        self.codec.encode(frame.clone(), &mut buf)?;
        let stream = self.live_stream()?;
        stream.write_all(&buf).await?;
        stream.flush().await?;
        Ok(())
    }

    pub(crate) async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        let stream = self.live_stream()?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Reads exactly one reply, appending from the socket until the codec
    /// produces a complete frame.
    pub(crate) async fn read_frame(&mut self) -> Result<RespFrame, ClientError> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.read_buf)? {
                self.inflight = false;
                return Ok(frame);
            }
            let n = self
                .stream
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?
                .read_buf(&mut self.read_buf)
                .await?;
            if n == 0 {
                return Err(ClientError::ConnectionClosed);
            }
        }
    }

    /// Discards anything already sitting in the receive path: the local
    /// buffer, and any bytes the socket can hand over without waiting.
    pub(crate) fn drain_residual(&mut self) {
        self.read_buf.clear();
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        let mut scratch = [0u8; 4096];
        loop {
            match stream.read(&mut scratch).now_or_never() {
                Some(Ok(n)) if n > 0 => {
                    debug!(discarded = n, "drained residual bytes from socket");
                }
                _ => break,
            }
        }
    }

    pub(crate) async fn shutdown(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.read_buf.clear();
        self.inflight = false;
    }
}

#[derive(Debug)]
pub(crate) struct ConnectionInner {
    config: ConnectionConfig,
    io: Mutex<ConnIo>,
    state: AtomicU8,
    is_subscribed: AtomicBool,
    subscriptions: parking_lot::Mutex<SubscriptionSets>,
    readonly_sent: AtomicBool,
    /// Interrupts a subscription loop when the connection is closed from
    /// another task.
    stop: Notify,
    /// Unsubscribe requests queued by other tasks for the subscription loop,
    /// which owns the socket while subscribed and writes them itself.
    unsub_queue: parking_lot::Mutex<Vec<(SubscriptionKind, Vec<Bytes>)>>,
    control: Notify,
}

/// A connection to one node. Cheap to clone; all clones share the socket and
/// its mutex.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Establishes the socket and runs the handshake: PING, optional AUTH,
    /// optional SELECT. Failures propagate and leave no connection object.
    pub async fn open(config: ConnectionConfig) -> Result<Self, ClientError> {
        let mut io = ConnIo::empty();
        establish_and_handshake(&mut io, &config).await?;
        debug!(node = %config.addr(), "connection established");
        Ok(Self {
            inner: Arc::new(ConnectionInner {
                config,
                io: Mutex::new(io),
                state: AtomicU8::new(ConnectionState::Ready as u8),
                is_subscribed: AtomicBool::new(false),
                subscriptions: parking_lot::Mutex::new(SubscriptionSets::default()),
                readonly_sent: AtomicBool::new(false),
                stop: Notify::new(),
                unsub_queue: parking_lot::Mutex::new(Vec::new()),
                control: Notify::new(),
            }),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.load(Ordering::SeqCst).into()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.inner.state.store(state as u8, Ordering::SeqCst);
    }

    /// `host:port` of the node this connection talks to.
    pub fn addr(&self) -> String {
        self.inner.config.addr()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// True while a subscription loop owns the read side.
    pub fn is_subscribed(&self) -> bool {
        self.inner.is_subscribed.load(Ordering::SeqCst)
    }

    /// Snapshot of the three subscription sets.
    pub fn subscriptions(&self) -> SubscriptionSets {
        self.inner.subscriptions.lock().clone()
    }

    /// Sends `request` and reads its reply under the connection mutex.
    pub async fn exchange(&self, request: RespFrame) -> Result<RespFrame, ClientError> {
        if self.is_subscribed() {
            return Err(ClientError::SubscribedConnection);
        }
        let mut io = self.inner.io.lock().await;
        self.prepare_io(&mut io).await?;
        io.inflight = true;
        if let Err(err) = io.write_frame(&request).await {
            return Err(self.downgrade(err));
        }
        match io.read_frame().await {
            Ok(reply) => Ok(reply),
            Err(err) => Err(self.downgrade(err)),
        }
    }

    /// Sends `request` without reading a reply.
    pub async fn send(&self, request: RespFrame) -> Result<(), ClientError> {
        if self.is_subscribed() {
            return Err(ClientError::SubscribedConnection);
        }
        let mut io = self.inner.io.lock().await;
        self.prepare_io(&mut io).await?;
        io.inflight = true;
        io.write_frame(&request)
            .await
            .map_err(|err| self.downgrade(err))
    }

    /// Reads one reply. The counterpart of [`send`](Self::send); also the
    /// primitive under the subscription engine's reception loop.
    pub async fn recv(&self) -> Result<RespFrame, ClientError> {
        let mut io = self.inner.io.lock().await;
        io.read_frame().await.map_err(|err| self.downgrade(err))
    }

    /// Writes a batch of already-encoded requests and reads exactly as many
    /// replies, optionally in chunks of `batch_size` to bound socket-buffer
    /// pressure. Replies come back in issue order.
    pub(crate) async fn pipeline_exchange(
        &self,
        frames: &[RespFrame],
        batch_size: Option<usize>,
    ) -> Result<Vec<RespFrame>, ClientError> {
        if self.is_subscribed() {
            return Err(ClientError::SubscribedConnection);
        }
        let mut io = self.inner.io.lock().await;
        self.prepare_io(&mut io).await?;

        let chunk = batch_size.unwrap_or(frames.len()).max(1);
        let mut replies = Vec::with_capacity(frames.len());
        for batch in frames.chunks(chunk) {
            let mut wire = BytesMut::new();
            for frame in batch {
                RespFrameCodec.encode(frame.clone(), &mut wire)?;
            }
            io.inflight = true;
            if let Err(err) = io.write_bytes(&wire).await {
                return Err(self.downgrade(err));
            }
            for _ in batch {
                match io.read_frame().await {
                    Ok(reply) => replies.push(reply),
                    Err(err) => return Err(self.downgrade(err)),
                }
            }
        }
        Ok(replies)
    }

    /// Closes the socket idempotently. A subscription loop holding the IO
    /// mutex is signalled instead and performs the teardown itself.
    pub async fn close(&self) {
        self.set_state(ConnectionState::Closing);
        // notify_one stores a permit, so a subscription loop that is busy
        // processing a message still observes the stop on its next wait.
        self.inner.stop.notify_one();
        if let Ok(mut io) = self.inner.io.try_lock() {
            io.shutdown().await;
        }
        self.set_state(ConnectionState::Closed);
    }

    /// Replaces the socket and re-runs the handshake.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        let mut io = self.inner.io.lock().await;
        self.reconnect_locked(&mut io).await
    }

    pub(crate) async fn reconnect_locked(&self, io: &mut ConnIo) -> Result<(), ClientError> {
        io.shutdown().await;
        self.set_state(ConnectionState::Opening);
        match establish_and_handshake(io, &self.inner.config).await {
            Ok(()) => {
                // A fresh socket starts in normal mode; a replica connection
                // must re-issue READONLY before serving reads again.
                self.inner.readonly_sent.store(false, Ordering::SeqCst);
                self.set_state(ConnectionState::Ready);
                debug!(node = %self.addr(), "reconnected");
                Ok(())
            }
            Err(err) => {
                self.set_state(ConnectionState::Broken);
                Err(err)
            }
        }
    }

    /// Brings the connection to the ready state, reconnecting with bounded
    /// backoff when it is closed or broken and retries are enabled.
    pub(crate) async fn ensure_live(&self, io: &mut ConnIo) -> Result<(), ClientError> {
        if self.state() == ConnectionState::Ready && io.stream.is_some() && !io.inflight {
            return Ok(());
        }
        let retry = &self.inner.config.retry;
        if !retry.enabled {
            return Err(ClientError::ConnectionClosed);
        }
        for attempt in 1..=retry.max_attempts.max(1) {
            match self.reconnect_locked(io).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(
                        node = %self.addr(),
                        attempt,
                        error = %err,
                        "reconnect attempt failed"
                    );
                    if attempt < retry.max_attempts {
                        tokio::time::sleep(retry.backoff.delay(attempt)).await;
                    }
                }
            }
        }
        self.set_state(ConnectionState::Broken);
        Err(ClientError::ConnectionClosed)
    }

    /// Common prologue for every synchronous use of the socket: flush any
    /// residual bytes, then make sure the connection is live.
    async fn prepare_io(&self, io: &mut ConnIo) -> Result<(), ClientError> {
        if io.inflight {
            // A previous caller was cancelled between write and read; the
            // stream position is unknown. Force a fresh socket.
            warn!(node = %self.addr(), "abandoned in-flight request, reconnecting");
            io.shutdown().await;
            self.set_state(ConnectionState::Broken);
        }
        io.drain_residual();
        self.ensure_live(io).await
    }

    /// Downgrades the liveness state after a transport failure and maps the
    /// error to the caller-visible kind.
    pub(crate) fn downgrade(&self, err: ClientError) -> ClientError {
        match self.state() {
            ConnectionState::Closing | ConnectionState::Closed => {}
            _ => self.set_state(ConnectionState::Broken),
        }
        match err {
            ClientError::Io(io_err) => {
                warn!(node = %self.addr(), error = %io_err, "transport failure");
                ClientError::ConnectionClosed
            }
            other => other,
        }
    }

    /// Latches the per-connection `READONLY` marker. Returns true exactly
    /// once, for the caller that must issue the command.
    pub(crate) fn mark_readonly(&self) -> bool {
        self.inner
            .readonly_sent
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    // Subscription-engine plumbing. The engine claims the flag, holds the IO
    // guard for the whole subscribed period, and owns the set bookkeeping.

    pub(crate) fn try_begin_subscription(&self) -> bool {
        self.inner
            .is_subscribed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn end_subscription(&self) {
        self.inner.is_subscribed.store(false, Ordering::SeqCst);
    }

    pub(crate) fn subscription_sets(&self) -> &parking_lot::Mutex<SubscriptionSets> {
        &self.inner.subscriptions
    }

    pub(crate) fn stop_signal(&self) -> &Notify {
        &self.inner.stop
    }

    pub(crate) fn control_signal(&self) -> &Notify {
        &self.inner.control
    }

    /// Hands an unsubscribe request to the running subscription loop.
    /// Returns false when no loop is live, in which case there is nothing to
    /// narrow and the request is dropped.
    pub(crate) fn queue_unsubscribe(&self, kind: SubscriptionKind, names: Vec<Bytes>) -> bool {
        if !self.is_subscribed() {
            return false;
        }
        self.inner.unsub_queue.lock().push((kind, names));
        self.inner.control.notify_one();
        true
    }

    pub(crate) fn take_unsubscribe_requests(&self) -> Vec<(SubscriptionKind, Vec<Bytes>)> {
        std::mem::take(&mut *self.inner.unsub_queue.lock())
    }

    pub(crate) async fn lock_io(&self) -> MutexGuard<'_, ConnIo> {
        self.inner.io.lock().await
    }
}

/// Connects the socket and runs the handshake into `io`.
async fn establish_and_handshake(
    io: &mut ConnIo,
    config: &ConnectionConfig,
) -> Result<(), ClientError> {
    let stream = RespStream::establish(config).await?;
    io.replace_stream(stream);
    handshake(io, config).await
}

/// PING, then AUTH iff credentials are configured, then SELECT iff the
/// database index is non-zero.
async fn handshake(io: &mut ConnIo, config: &ConnectionConfig) -> Result<(), ClientError> {
    let pong = roundtrip(io, command("PING", [])).await?;
    match pong {
        RespFrame::SimpleString(s) if s.eq_ignore_ascii_case("PONG") => {}
        RespFrame::Error(line) => return Err(ClientError::from_error_line(&line)),
        other => {
            return Err(ClientError::UnexpectedReply(format!(
                "handshake PING answered with {other:?}"
            )));
        }
    }

    if let Some(password) = &config.password {
        let args: Vec<Bytes> = match &config.username {
            Some(user) => vec![
                Bytes::from(user.clone()),
                Bytes::from(password.clone()),
            ],
            None => vec![Bytes::from(password.clone())],
        };
        expect_ok(roundtrip(io, command("AUTH", args)).await?, "AUTH")?;
    }

    if config.database != 0 {
        let index = Bytes::from(config.database.to_string());
        expect_ok(roundtrip(io, command("SELECT", [index])).await?, "SELECT")?;
    }

    Ok(())
}

async fn roundtrip(io: &mut ConnIo, request: RespFrame) -> Result<RespFrame, ClientError> {
    io.write_frame(&request).await?;
    io.read_frame().await
}

fn expect_ok(reply: RespFrame, what: &str) -> Result<(), ClientError> {
    match reply {
        RespFrame::SimpleString(s) if s.eq_ignore_ascii_case("OK") => Ok(()),
        RespFrame::Error(line) => Err(ClientError::from_error_line(&line)),
        other => Err(ClientError::UnexpectedReply(format!(
            "handshake {what} answered with {other:?}"
        ))),
    }
}
