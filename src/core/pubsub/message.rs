// src/core/pubsub/message.rs

//! Decodes the push frames a server delivers on a subscribed connection.

use crate::core::protocol::RespFrame;
use bytes::Bytes;

/// Control notification tags, one per subscribe/unsubscribe variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Subscribe,
    Unsubscribe,
    PSubscribe,
    PUnsubscribe,
    SSubscribe,
    SUnsubscribe,
}

impl ControlKind {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"subscribe" => Some(ControlKind::Subscribe),
            b"unsubscribe" => Some(ControlKind::Unsubscribe),
            b"psubscribe" => Some(ControlKind::PSubscribe),
            b"punsubscribe" => Some(ControlKind::PUnsubscribe),
            b"ssubscribe" => Some(ControlKind::SSubscribe),
            b"sunsubscribe" => Some(ControlKind::SUnsubscribe),
            _ => None,
        }
    }
}

/// One push delivered while subscribed: a data message on a channel, a
/// pattern match, a shard message, or a control notification.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionMessage {
    Message {
        channel: Bytes,
        payload: Bytes,
    },
    PatternMessage {
        pattern: Bytes,
        channel: Bytes,
        payload: Bytes,
    },
    ShardMessage {
        channel: Bytes,
        payload: Bytes,
    },
    Control {
        kind: ControlKind,
        /// The affected name; nil when the server reports a blanket
        /// unsubscribe.
        name: Option<Bytes>,
        /// Remaining subscription count reported by the server.
        count: i64,
    },
}

fn bulk(frame: &RespFrame) -> Option<Bytes> {
    match frame {
        RespFrame::BulkString(b) => Some(b.clone()),
        _ => None,
    }
}

impl SubscriptionMessage {
    /// Decodes a push frame. Returns `None` for shapes outside the pub/sub
    /// vocabulary; the reception loop treats those as protocol noise.
    pub fn parse(frame: &RespFrame) -> Option<Self> {
        let RespFrame::Array(parts) = frame else {
            return None;
        };
        let tag = bulk(parts.first()?)?;

        match tag.as_ref() {
            b"message" if parts.len() == 3 => Some(SubscriptionMessage::Message {
                channel: bulk(&parts[1])?,
                payload: bulk(&parts[2])?,
            }),
            b"pmessage" if parts.len() == 4 => Some(SubscriptionMessage::PatternMessage {
                pattern: bulk(&parts[1])?,
                channel: bulk(&parts[2])?,
                payload: bulk(&parts[3])?,
            }),
            b"smessage" if parts.len() == 3 => Some(SubscriptionMessage::ShardMessage {
                channel: bulk(&parts[1])?,
                payload: bulk(&parts[2])?,
            }),
            other => {
                let kind = ControlKind::from_tag(other)?;
                if parts.len() != 3 {
                    return None;
                }
                let name = match &parts[1] {
                    RespFrame::BulkString(b) => Some(b.clone()),
                    RespFrame::Null | RespFrame::NullArray => None,
                    _ => return None,
                };
                let count = match &parts[2] {
                    RespFrame::Integer(i) => *i,
                    _ => return None,
                };
                Some(SubscriptionMessage::Control { kind, name, count })
            }
        }
    }

    /// The payload of a data message; `None` for control notifications.
    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            SubscriptionMessage::Message { payload, .. }
            | SubscriptionMessage::PatternMessage { payload, .. }
            | SubscriptionMessage::ShardMessage { payload, .. } => Some(payload),
            SubscriptionMessage::Control { .. } => None,
        }
    }

    /// The channel a data message arrived on.
    pub fn channel(&self) -> Option<&Bytes> {
        match self {
            SubscriptionMessage::Message { channel, .. }
            | SubscriptionMessage::PatternMessage { channel, .. }
            | SubscriptionMessage::ShardMessage { channel, .. } => Some(channel),
            SubscriptionMessage::Control { .. } => None,
        }
    }
}
