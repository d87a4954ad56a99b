// src/lib.rs

//! carnelian: an asynchronous, cluster-aware client for Redis-compatible
//! in-memory data stores.
//!
//! The crate is organized around a small set of collaborating parts: the RESP
//! wire codec, a connection type with automatic reconnection, a cluster
//! router built on CRC16 hash slots, a pipelining engine, a subscription
//! engine, and a distributed advisory lock manager. The [`Client`] facade
//! ties them together.

pub mod client;
pub mod config;
pub mod core;

// Re-export
pub use crate::client::{Client, Request};
pub use crate::config::ConnectionConfig;
pub use crate::core::ClientError;
pub use crate::core::protocol::{RespFrame, RespValue};
