// src/core/protocol/resp_value.rs

//! Defines a simplified value type handed to the command-helper layer.

use crate::core::ClientError;
use bytes::Bytes;

use super::RespFrame;

/// `RespValue` is a simplified view of a decoded [`RespFrame`] reply.
///
/// The command-helper layer works in terms of values, not wire frames. After
/// [`execute`](crate::core::executor::execute) has classified server errors,
/// the `Error` variant only appears inside pipeline results, where per-command
/// failures are reported in place instead of aborting the whole batch.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    SimpleString(String),
    BulkString(Bytes),
    Integer(i64),
    Array(Vec<RespValue>),
    Null,
    NullArray,
    Error(String),
}

impl From<RespFrame> for RespValue {
    fn from(frame: RespFrame) -> Self {
        match frame {
            RespFrame::SimpleString(s) => RespValue::SimpleString(s),
            RespFrame::Error(s) => RespValue::Error(s),
            RespFrame::Integer(i) => RespValue::Integer(i),
            RespFrame::BulkString(b) => RespValue::BulkString(b),
            RespFrame::Null => RespValue::Null,
            RespFrame::NullArray => RespValue::NullArray,
            RespFrame::Array(arr) => RespValue::Array(arr.into_iter().map(Into::into).collect()),
        }
    }
}

impl RespValue {
    /// True for `+OK`.
    pub fn is_ok(&self) -> bool {
        matches!(self, RespValue::SimpleString(s) if s == "OK")
    }

    /// True for either nil representation.
    pub fn is_nil(&self) -> bool {
        matches!(self, RespValue::Null | RespValue::NullArray)
    }

    /// Extracts an integer reply.
    pub fn as_int(&self) -> Result<i64, ClientError> {
        match self {
            RespValue::Integer(i) => Ok(*i),
            other => Err(ClientError::UnexpectedReply(format!(
                "expected integer, got {other:?}"
            ))),
        }
    }

    /// Extracts the payload of a bulk or simple string reply; `None` for nil.
    pub fn into_bytes(self) -> Result<Option<Bytes>, ClientError> {
        match self {
            RespValue::BulkString(b) => Ok(Some(b)),
            RespValue::SimpleString(s) => Ok(Some(Bytes::from(s))),
            RespValue::Null | RespValue::NullArray => Ok(None),
            other => Err(ClientError::UnexpectedReply(format!(
                "expected bulk string, got {other:?}"
            ))),
        }
    }

    /// Extracts a string reply, decoding bulk payloads as UTF-8 (lossy).
    pub fn into_string(self) -> Result<Option<String>, ClientError> {
        Ok(self
            .into_bytes()?
            .map(|b| String::from_utf8_lossy(&b).to_string()))
    }

    /// Extracts an array reply; `None` for the nil array.
    pub fn into_array(self) -> Result<Option<Vec<RespValue>>, ClientError> {
        match self {
            RespValue::Array(arr) => Ok(Some(arr)),
            RespValue::Null | RespValue::NullArray => Ok(None),
            other => Err(ClientError::UnexpectedReply(format!(
                "expected array, got {other:?}"
            ))),
        }
    }

    /// Checks for `+OK`, surfacing anything else as an unexpected reply.
    pub fn expect_ok(&self) -> Result<(), ClientError> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(ClientError::UnexpectedReply(format!(
                "expected +OK, got {self:?}"
            )))
        }
    }
}
