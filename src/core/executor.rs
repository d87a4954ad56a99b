// src/core/executor.rs

//! The narrow waist between command helpers and the wire: send one request
//! on one connection, decode one reply, classify errors.

use crate::core::ClientError;
use crate::core::connection::Connection;
use crate::core::protocol::{RespFrame, RespValue};

/// Executes `request` on `conn`: residual flush, liveness (with reconnect
/// and bounded backoff when enabled), write, read one reply.
///
/// A `-PREFIX message` reply is raised as [`ClientError::Server`] with the
/// prefix split out; transport failures surface as
/// [`ClientError::ConnectionClosed`] once recovery is exhausted.
pub async fn execute(conn: &Connection, request: RespFrame) -> Result<RespValue, ClientError> {
    match conn.exchange(request).await? {
        RespFrame::Error(line) => Err(ClientError::from_error_line(&line)),
        reply => Ok(RespValue::from(reply)),
    }
}
