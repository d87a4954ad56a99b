// src/core/pubsub/mod.rs

//! The subscription engine.
//!
//! A subscribing call is a blocking operation on the caller's task: it issues
//! the subscribe command, then runs the reception loop until a stop condition
//! is met, the server confirms the last unsubscribe, or the connection dies.
//! The loop holds the connection's IO mutex for the whole subscribed period,
//! so the read side has exactly one owner; other callers are rejected up
//! front via the `is_subscribed` flag without consuming any reply.
//!
//! The three subscription sets are registered before the loop starts and
//! mutated only by the loop task afterwards; outside observers get snapshots.

pub mod message;

pub use message::{ControlKind, SubscriptionMessage};

use crate::core::ClientError;
use crate::core::connection::{ConnIo, Connection, ConnectionState};
use crate::core::protocol::command;
use bytes::Bytes;
use std::collections::HashSet;
use tracing::{debug, warn};

/// The three subscription variants. They differ only in command names,
/// message tags and which set they own; the reception loop is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    Channel,
    Pattern,
    Shard,
}

impl SubscriptionKind {
    pub fn subscribe_command(self) -> &'static str {
        match self {
            SubscriptionKind::Channel => "SUBSCRIBE",
            SubscriptionKind::Pattern => "PSUBSCRIBE",
            SubscriptionKind::Shard => "SSUBSCRIBE",
        }
    }

    pub fn unsubscribe_command(self) -> &'static str {
        match self {
            SubscriptionKind::Channel => "UNSUBSCRIBE",
            SubscriptionKind::Pattern => "PUNSUBSCRIBE",
            SubscriptionKind::Shard => "SUNSUBSCRIBE",
        }
    }

    fn unsubscribe_control(self) -> ControlKind {
        match self {
            SubscriptionKind::Channel => ControlKind::Unsubscribe,
            SubscriptionKind::Pattern => ControlKind::PUnsubscribe,
            SubscriptionKind::Shard => ControlKind::SUnsubscribe,
        }
    }

    /// For a data message of this kind, the name checked against the active
    /// set: the channel for channel and shard messages, the pattern for
    /// pattern messages.
    fn data_name<'m>(self, msg: &'m SubscriptionMessage) -> Option<&'m Bytes> {
        match (self, msg) {
            (SubscriptionKind::Channel, SubscriptionMessage::Message { channel, .. }) => {
                Some(channel)
            }
            (SubscriptionKind::Pattern, SubscriptionMessage::PatternMessage { pattern, .. }) => {
                Some(pattern)
            }
            (SubscriptionKind::Shard, SubscriptionMessage::ShardMessage { channel, .. }) => {
                Some(channel)
            }
            _ => None,
        }
    }
}

/// The per-connection subscription state: channels, patterns and shard
/// channels currently registered.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSets {
    pub channels: HashSet<Bytes>,
    pub patterns: HashSet<Bytes>,
    pub shard_channels: HashSet<Bytes>,
}

impl SubscriptionSets {
    pub fn set(&self, kind: SubscriptionKind) -> &HashSet<Bytes> {
        match kind {
            SubscriptionKind::Channel => &self.channels,
            SubscriptionKind::Pattern => &self.patterns,
            SubscriptionKind::Shard => &self.shard_channels,
        }
    }

    pub fn set_mut(&mut self, kind: SubscriptionKind) -> &mut HashSet<Bytes> {
        match kind {
            SubscriptionKind::Channel => &mut self.channels,
            SubscriptionKind::Pattern => &mut self.patterns,
            SubscriptionKind::Shard => &mut self.shard_channels,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.patterns.is_empty() && self.shard_channels.is_empty()
    }

    pub fn clear(&mut self) {
        self.channels.clear();
        self.patterns.clear();
        self.shard_channels.clear();
    }
}

/// Runs a subscription of `kind` for `names` on `conn`.
///
/// `handler` is invoked for every data message whose name is still in the
/// active set; `stop_when` breaks the loop when it returns true for a
/// delivered message; `on_error` is the single extension point for errors
/// inside the loop: returning `Ok(())` resumes reception, returning an
/// error ends the subscription with it. Cleanup runs on every exit path.
pub async fn run_subscription<H, P, E>(
    conn: &Connection,
    kind: SubscriptionKind,
    names: &[Bytes],
    mut handler: H,
    mut stop_when: P,
    mut on_error: E,
) -> Result<(), ClientError>
where
    H: FnMut(&SubscriptionMessage) + Send,
    P: FnMut(&SubscriptionMessage) -> bool + Send,
    E: FnMut(ClientError) -> Result<(), ClientError> + Send,
{
    if names.is_empty() {
        return Ok(());
    }
    if !conn.try_begin_subscription() {
        return Err(ClientError::SubscribedConnection);
    }

    let mut io = conn.lock_io().await;

    // Register the requested names before entering the loop; from here on
    // only this task touches the sets until teardown.
    {
        let mut sets = conn.subscription_sets().lock();
        sets.set_mut(kind).extend(names.iter().cloned());
    }

    let setup = async {
        io.drain_residual();
        conn.ensure_live(&mut io).await?;
        io.write_frame(&command(kind.subscribe_command(), names.iter().cloned()))
            .await
    }
    .await;

    let result = match setup {
        Err(err) => Err(conn.downgrade(err)),
        Ok(()) => {
            debug!(node = %conn.addr(), kind = ?kind, count = names.len(), "subscription started");
            reception_loop(
                conn,
                kind,
                &mut io,
                &mut handler,
                &mut stop_when,
                &mut on_error,
            )
            .await
        }
    };

    teardown(conn, kind, &mut io, &result).await;
    result
}

async fn reception_loop<H, P, E>(
    conn: &Connection,
    kind: SubscriptionKind,
    io: &mut ConnIo,
    handler: &mut H,
    stop_when: &mut P,
    on_error: &mut E,
) -> Result<(), ClientError>
where
    H: FnMut(&SubscriptionMessage) + Send,
    P: FnMut(&SubscriptionMessage) -> bool + Send,
    E: FnMut(ClientError) -> Result<(), ClientError> + Send,
{
    loop {
        // Queued unsubscribe requests from other tasks are written here,
        // by the one task that owns the socket while subscribed. The server
        // answers with the confirmations handled further down.
        let received = match service_unsubscribe_requests(conn, io).await {
            Err(err) => Err(err),
            Ok(()) => tokio::select! {
                biased;
                // Interrupted by close() from another task. A permit left
                // over from a close() before a reconnect is ignored.
                _ = conn.stop_signal().notified() => {
                    if matches!(
                        conn.state(),
                        ConnectionState::Closing | ConnectionState::Closed
                    ) {
                        Err(ClientError::ConnectionClosed)
                    } else {
                        continue;
                    }
                }
                // New unsubscribe requests; loop around to write them.
                _ = conn.control_signal().notified() => continue,
                frame = io.read_frame() => frame.map_err(|err| conn.downgrade(err)),
            },
        };

        let frame = match received {
            Ok(frame) => frame,
            Err(err) => {
                let io_class = err.is_io_class();
                match on_error(err) {
                    Ok(()) if !io_class => continue,
                    // A dead transport cannot be resumed; stop regardless of
                    // what the handler decided.
                    Ok(()) => return Err(ClientError::ConnectionClosed),
                    Err(err) => return Err(err),
                }
            }
        };

        let Some(msg) = SubscriptionMessage::parse(&frame) else {
            debug!(node = %conn.addr(), "ignoring non-pub/sub push frame");
            continue;
        };

        if let Some(name) = kind.data_name(&msg) {
            let active = conn.subscription_sets().lock().set(kind).contains(name);
            if active {
                handler(&msg);
                if stop_when(&msg) {
                    debug!(node = %conn.addr(), "stop predicate matched");
                    return Ok(());
                }
            }
            continue;
        }

        if let SubscriptionMessage::Control { kind: ctl, name, .. } = &msg
            && *ctl == kind.unsubscribe_control()
        {
            let mut sets = conn.subscription_sets().lock();
            match name {
                Some(n) => {
                    sets.set_mut(kind).remove(n);
                }
                // A nil name is a blanket unsubscribe notification.
                None => sets.set_mut(kind).clear(),
            }
            let drained = sets.set(kind).is_empty();
            drop(sets);
            if drained {
                debug!(node = %conn.addr(), "all subscriptions drained");
                return Ok(());
            }
        }
        // Subscribe confirmations and unrelated control tags carry no action.
    }
}

/// Writes every queued unsubscribe request onto the subscribed socket.
async fn service_unsubscribe_requests(
    conn: &Connection,
    io: &mut ConnIo,
) -> Result<(), ClientError> {
    for (kind, names) in conn.take_unsubscribe_requests() {
        debug!(node = %conn.addr(), kind = ?kind, count = names.len(), "sending queued unsubscribe");
        io.write_frame(&command(kind.unsubscribe_command(), names))
            .await
            .map_err(|err| conn.downgrade(err))?;
    }
    Ok(())
}

/// Unified teardown for every exit path: best-effort server-side
/// unsubscribe, set clearing, residual drain, and either reconnect (non-IO
/// exits) or leaving the connection broken (IO exits).
async fn teardown(
    conn: &Connection,
    kind: SubscriptionKind,
    io: &mut ConnIo,
    result: &Result<(), ClientError>,
) {
    let io_exit = matches!(result, Err(err) if err.is_io_class());

    let remaining: Vec<Bytes> = {
        let sets = conn.subscription_sets().lock();
        sets.set(kind).iter().cloned().collect()
    };
    if !remaining.is_empty() && !io_exit && conn.state() == ConnectionState::Ready {
        // Drain the server-side registrations; confirmations are swept up by
        // the residual drain here or before the next synchronous command.
        if let Err(err) = io
            .write_frame(&command(kind.unsubscribe_command(), remaining))
            .await
        {
            warn!(node = %conn.addr(), error = %err, "failed to send unsubscribe during teardown");
        }
    }

    conn.subscription_sets().lock().clear();
    // Requests that arrived too late to be serviced die with the loop.
    conn.take_unsubscribe_requests();
    io.drain_residual();
    conn.end_subscription();

    match result {
        Err(err) if err.is_io_class() => {
            // Remote abort or close() from another task: leave the
            // connection in its terminal state for the caller to observe.
            io.shutdown().await;
        }
        Err(err) => {
            debug!(node = %conn.addr(), error = %err, "reconnecting after non-IO subscription exit");
            if let Err(reconnect_err) = conn.reconnect_locked(io).await {
                warn!(node = %conn.addr(), error = %reconnect_err, "post-subscription reconnect failed");
            }
        }
        Ok(()) => {}
    }
}

impl Connection {
    /// Subscribes to `channels` and blocks servicing messages until
    /// `stop_when` matches, the last channel is unsubscribed, or the
    /// connection dies. Errors inside the loop re-raise.
    pub async fn subscribe<H, P>(
        &self,
        channels: &[Bytes],
        handler: H,
        stop_when: P,
    ) -> Result<(), ClientError>
    where
        H: FnMut(&SubscriptionMessage) + Send,
        P: FnMut(&SubscriptionMessage) -> bool + Send,
    {
        run_subscription(self, SubscriptionKind::Channel, channels, handler, stop_when, Err).await
    }

    /// Pattern variant of [`subscribe`](Self::subscribe).
    pub async fn psubscribe<H, P>(
        &self,
        patterns: &[Bytes],
        handler: H,
        stop_when: P,
    ) -> Result<(), ClientError>
    where
        H: FnMut(&SubscriptionMessage) + Send,
        P: FnMut(&SubscriptionMessage) -> bool + Send,
    {
        run_subscription(self, SubscriptionKind::Pattern, patterns, handler, stop_when, Err).await
    }

    /// Sharded variant of [`subscribe`](Self::subscribe).
    pub async fn ssubscribe<H, P>(
        &self,
        shard_channels: &[Bytes],
        handler: H,
        stop_when: P,
    ) -> Result<(), ClientError>
    where
        H: FnMut(&SubscriptionMessage) + Send,
        P: FnMut(&SubscriptionMessage) -> bool + Send,
    {
        run_subscription(
            self,
            SubscriptionKind::Shard,
            shard_channels,
            handler,
            stop_when,
            Err,
        )
        .await
    }

    /// Asks the running subscription loop to drop `channels` from its
    /// registration; an empty list unsubscribes from everything. The loop
    /// writes the UNSUBSCRIBE itself (it owns the socket while subscribed)
    /// and the server's confirmations shrink the active set, ending the
    /// subscription once it is empty. Returns false when no loop is live.
    pub fn unsubscribe(&self, channels: &[Bytes]) -> bool {
        self.request_unsubscribe(SubscriptionKind::Channel, channels)
    }

    /// Pattern variant of [`unsubscribe`](Self::unsubscribe).
    pub fn punsubscribe(&self, patterns: &[Bytes]) -> bool {
        self.request_unsubscribe(SubscriptionKind::Pattern, patterns)
    }

    /// Sharded variant of [`unsubscribe`](Self::unsubscribe).
    pub fn sunsubscribe(&self, shard_channels: &[Bytes]) -> bool {
        self.request_unsubscribe(SubscriptionKind::Shard, shard_channels)
    }

    /// Generic unsubscribe entry point.
    pub fn request_unsubscribe(&self, kind: SubscriptionKind, names: &[Bytes]) -> bool {
        self.queue_unsubscribe(kind, names.to_vec())
    }

    /// Like [`subscribe`](Self::subscribe) with a caller-supplied error
    /// handler: `Ok(())` resumes the loop, an error ends the subscription.
    pub async fn subscribe_with<H, P, E>(
        &self,
        kind: SubscriptionKind,
        names: &[Bytes],
        handler: H,
        stop_when: P,
        on_error: E,
    ) -> Result<(), ClientError>
    where
        H: FnMut(&SubscriptionMessage) + Send,
        P: FnMut(&SubscriptionMessage) -> bool + Send,
        E: FnMut(ClientError) -> Result<(), ClientError> + Send,
    {
        run_subscription(self, kind, names, handler, stop_when, on_error).await
    }
}
