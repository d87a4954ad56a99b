// src/client.rs

//! The top-level handle: discovery on connect, key-based routing, a small
//! command-helper surface, and entry points for pipelines, subscriptions and
//! locks. Helpers take the handle explicitly; the crate keeps no globals.

use crate::config::ConnectionConfig;
use crate::core::ClientError;
use crate::core::cluster::{NodeId, Route, router_for};
use crate::core::cluster::topology::discover;
use crate::core::executor::execute;
use crate::core::lock::LockManager;
use crate::core::pipeline::Pipeline;
use crate::core::protocol::{RespValue, command};
use crate::core::pubsub::{SubscriptionKind, SubscriptionMessage};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// One command, carrying everything the router and codec need: the name,
/// the argument vector, which arguments are keys, and the write/replica
/// routing flags.
#[derive(Debug, Clone)]
pub struct Request {
    name: String,
    args: Vec<Bytes>,
    keys: Vec<Bytes>,
    write: bool,
    replica: bool,
}

impl Request {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            args: Vec::new(),
            keys: Vec::new(),
            write: false,
            replica: false,
        }
    }

    /// Appends a plain argument.
    pub fn arg(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends an argument that is also a routing key.
    pub fn key(mut self, key: impl Into<Bytes>) -> Self {
        let key = key.into();
        self.keys.push(key.clone());
        self.args.push(key);
        self
    }

    /// Adds a routing key without emitting it as an argument. Used when the
    /// key position and argument order diverge (e.g. `EVAL`).
    pub fn route_by(mut self, key: impl Into<Bytes>) -> Self {
        self.keys.push(key.into());
        self
    }

    /// Marks the command cluster-wide: it goes to an arbitrary node, or an
    /// arbitrary primary when it writes.
    pub fn wildcard(mut self) -> Self {
        self.keys = vec![Bytes::from_static(b"*")];
        self
    }

    /// Marks the command as a write; writes always route to a primary.
    pub fn write(mut self) -> Self {
        self.write = true;
        self
    }

    /// Allows a read to be served by a random replica of the key's slot.
    pub fn from_replica(mut self) -> Self {
        self.replica = true;
        self
    }

    pub fn keys(&self) -> &[Bytes] {
        &self.keys
    }

    pub fn is_write(&self) -> bool {
        self.write
    }

    pub fn wants_replica(&self) -> bool {
        self.replica
    }

    pub fn name_uppercase(&self) -> String {
        self.name.to_uppercase()
    }

    /// Encodes into the wire frame: a RESP array of bulk strings with the
    /// command name uppercase.
    pub fn into_frame(self) -> crate::core::protocol::RespFrame {
        command(&self.name, self.args)
    }
}

/// A cluster- or standalone-connected client. Cheap to clone; clones share
/// the router and its connections.
#[derive(Clone)]
pub struct Client {
    router: Arc<dyn Route>,
}

impl Client {
    /// Connects to the seed endpoint, discovers the deployment shape, and
    /// builds the matching router.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, ClientError> {
        let discovered = discover(&config).await?;
        Ok(Self {
            router: router_for(&config, discovered),
        })
    }

    /// Builds a client over an existing router. The escape hatch for tests
    /// and for callers that assemble topology themselves.
    pub fn from_router(router: Arc<dyn Route>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> Arc<dyn Route> {
        self.router.clone()
    }

    /// Re-discovers the cluster topology and swaps it in atomically.
    /// A no-op in standalone mode.
    pub async fn refresh_topology(&self) -> Result<(), ClientError> {
        self.router.refresh().await
    }

    /// Routes and executes one command.
    pub async fn execute(&self, request: Request) -> Result<RespValue, ClientError> {
        let node = self
            .router
            .route(request.keys(), request.is_write(), request.wants_replica())
            .await?;
        execute(&node.conn, request.into_frame()).await
    }

    /// Runs `request` on every primary, in node-map order.
    pub async fn on_each_primary(
        &self,
        request: Request,
    ) -> Result<Vec<(NodeId, RespValue)>, ClientError> {
        let mut replies = Vec::new();
        for node in self.router.primaries() {
            let reply = execute(&node.conn, request.clone().into_frame()).await?;
            replies.push((node.id, reply));
        }
        Ok(replies)
    }

    /// Runs `request` on every node, primaries and replicas alike.
    pub async fn on_each_node(
        &self,
        request: Request,
    ) -> Result<Vec<(NodeId, RespValue)>, ClientError> {
        let mut replies = Vec::new();
        for node in self.router.nodes() {
            let reply = execute(&node.conn, request.clone().into_frame()).await?;
            replies.push((node.id, reply));
        }
        Ok(replies)
    }

    /// Starts an empty pipeline over this client's router.
    pub fn pipeline(&self, filter_multi_exec: bool) -> Pipeline {
        Pipeline::new(self.router.clone(), filter_multi_exec)
    }

    /// An advisory-lock manager sharing this client's connections.
    pub fn lock_manager(&self) -> LockManager {
        LockManager::new(self.clone())
    }

    // --- Command helpers. Thin wrappers; the catalog deliberately stops at
    // what the core machinery and its tests exercise. ---

    pub async fn ping(&self) -> Result<(), ClientError> {
        let reply = self.execute(Request::new("PING").wildcard()).await?;
        match reply {
            RespValue::SimpleString(s) if s.eq_ignore_ascii_case("PONG") => Ok(()),
            other => Err(ClientError::UnexpectedReply(format!(
                "PING answered with {other:?}"
            ))),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, ClientError> {
        self.execute(Request::new("GET").key(key.to_string()))
            .await?
            .into_bytes()
    }

    pub async fn set(&self, key: &str, value: impl Into<Bytes>) -> Result<(), ClientError> {
        self.execute(
            Request::new("SET")
                .key(key.to_string())
                .arg(value.into())
                .write(),
        )
        .await?
        .expect_ok()
    }

    /// `SET key value NX PX ttl`: true iff the key was created.
    pub async fn set_nx_px(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        ttl: Duration,
    ) -> Result<bool, ClientError> {
        let reply = self
            .execute(
                Request::new("SET")
                    .key(key.to_string())
                    .arg(value.into())
                    .arg(Bytes::from_static(b"NX"))
                    .arg(Bytes::from_static(b"PX"))
                    .arg(ttl.as_millis().to_string())
                    .write(),
            )
            .await?;
        Ok(reply.is_ok())
    }

    /// Deletes the given keys; cross-slot key sets fail at routing.
    pub async fn del(&self, keys: &[&str]) -> Result<i64, ClientError> {
        let mut request = Request::new("DEL").write();
        for key in keys {
            request = request.key(key.to_string());
        }
        self.execute(request).await?.as_int()
    }

    pub async fn exists(&self, key: &str) -> Result<bool, ClientError> {
        Ok(self
            .execute(Request::new("EXISTS").key(key.to_string()))
            .await?
            .as_int()?
            > 0)
    }

    pub async fn incr(&self, key: &str) -> Result<i64, ClientError> {
        self.execute(Request::new("INCR").key(key.to_string()).write())
            .await?
            .as_int()
    }

    pub async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, ClientError> {
        self.execute(
            Request::new("HINCRBY")
                .key(key.to_string())
                .arg(field.to_string())
                .arg(delta.to_string())
                .write(),
        )
        .await?
        .as_int()
    }

    pub async fn lpush(&self, key: &str, values: &[&str]) -> Result<i64, ClientError> {
        let mut request = Request::new("LPUSH").key(key.to_string()).write();
        for value in values {
            request = request.arg(value.to_string());
        }
        self.execute(request).await?.as_int()
    }

    pub async fn rpush(&self, key: &str, values: &[&str]) -> Result<i64, ClientError> {
        let mut request = Request::new("RPUSH").key(key.to_string()).write();
        for value in values {
            request = request.arg(value.to_string());
        }
        self.execute(request).await?.as_int()
    }

    pub async fn lpop(&self, key: &str) -> Result<Option<Bytes>, ClientError> {
        self.execute(Request::new("LPOP").key(key.to_string()).write())
            .await?
            .into_bytes()
    }

    pub async fn rpop(&self, key: &str) -> Result<Option<Bytes>, ClientError> {
        self.execute(Request::new("RPOP").key(key.to_string()).write())
            .await?
            .into_bytes()
    }

    /// Publishes to a channel; returns the number of receiving clients.
    pub async fn publish(
        &self,
        channel: &str,
        payload: impl Into<Bytes>,
    ) -> Result<i64, ClientError> {
        self.execute(
            Request::new("PUBLISH")
                .arg(channel.to_string())
                .arg(payload.into())
                .wildcard()
                .write(),
        )
        .await?
        .as_int()
    }

    /// Sharded publish, routed by the shard channel's hash slot.
    pub async fn spublish(
        &self,
        shard_channel: &str,
        payload: impl Into<Bytes>,
    ) -> Result<i64, ClientError> {
        self.execute(
            Request::new("SPUBLISH")
                .arg(shard_channel.to_string())
                .route_by(shard_channel.to_string())
                .arg(payload.into())
                .write(),
        )
        .await?
        .as_int()
    }

    /// `EVAL script numkeys keys… args…`, routed by the first key.
    pub async fn eval(
        &self,
        script: &str,
        keys: &[Bytes],
        args: &[Bytes],
    ) -> Result<RespValue, ClientError> {
        let mut request = Request::new("EVAL")
            .arg(script.to_string())
            .arg(keys.len().to_string())
            .write();
        for key in keys {
            request = request.arg(key.clone()).route_by(key.clone());
        }
        for arg in args {
            request = request.arg(arg.clone());
        }
        self.execute(request).await
    }

    pub async fn info(&self, section: Option<&str>) -> Result<String, ClientError> {
        let mut request = Request::new("INFO").wildcard();
        if let Some(section) = section {
            request = request.arg(section.to_string());
        }
        Ok(self.execute(request).await?.into_string()?.unwrap_or_default())
    }

    // --- Subscriptions. The call blocks the caller's task for the lifetime
    // of the subscription; run it in a spawned task to keep issuing commands
    // on other connections. ---

    /// Subscribes to `channels` on an arbitrary node.
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
        let node = self.router.route(&[Bytes::from_static(b"*")], false, false).await?;
        node.conn.subscribe(channels, handler, stop_when).await
    }

    /// Subscribes to glob patterns on an arbitrary node.
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
        let node = self.router.route(&[Bytes::from_static(b"*")], false, false).await?;
        node.conn.psubscribe(patterns, handler, stop_when).await
    }

    /// Subscribes to shard channels on the node owning their slot. Shard
    /// channels spanning slots fail `CrossSlot`; issue one call per hash-tag
    /// group to cover multiple shards.
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
        let node = self.router.route(shard_channels, false, false).await?;
        node.conn.ssubscribe(shard_channels, handler, stop_when).await
    }

    /// Asks every connection with a live subscription loop to drop
    /// `channels`; an empty list unsubscribes from everything. Returns true
    /// when at least one loop accepted the request.
    pub fn unsubscribe(&self, channels: &[Bytes]) -> bool {
        self.forward_unsubscribe(SubscriptionKind::Channel, channels)
    }

    /// Pattern variant of [`unsubscribe`](Self::unsubscribe).
    pub fn punsubscribe(&self, patterns: &[Bytes]) -> bool {
        self.forward_unsubscribe(SubscriptionKind::Pattern, patterns)
    }

    /// Sharded variant of [`unsubscribe`](Self::unsubscribe). Only the node
    /// hosting the shard subscription has a loop to service it.
    pub fn sunsubscribe(&self, shard_channels: &[Bytes]) -> bool {
        self.forward_unsubscribe(SubscriptionKind::Shard, shard_channels)
    }

    fn forward_unsubscribe(&self, kind: SubscriptionKind, names: &[Bytes]) -> bool {
        let mut delivered = false;
        for node in self.router.nodes() {
            if node.conn.request_unsubscribe(kind, names) {
                delivered = true;
            }
        }
        delivered
    }

    /// Generic subscription entry point with a caller-supplied error handler.
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
        let node = match kind {
            SubscriptionKind::Shard => self.router.route(names, false, false).await?,
            _ => self.router.route(&[Bytes::from_static(b"*")], false, false).await?,
        };
        node.conn
            .subscribe_with(kind, names, handler, stop_when, on_error)
            .await
    }
}
