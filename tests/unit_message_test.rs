// tests/unit_message_test.rs

use bytes::Bytes;
use carnelian::core::protocol::RespFrame;
use carnelian::core::pubsub::{ControlKind, SubscriptionMessage};

fn bulk(s: &str) -> RespFrame {
    RespFrame::BulkString(Bytes::copy_from_slice(s.as_bytes()))
}

#[test]
fn test_parse_channel_message() {
    let frame = RespFrame::Array(vec![bulk("message"), bulk("news"), bulk("hello")]);
    assert_eq!(
        SubscriptionMessage::parse(&frame),
        Some(SubscriptionMessage::Message {
            channel: Bytes::from_static(b"news"),
            payload: Bytes::from_static(b"hello"),
        })
    );
}

#[test]
fn test_parse_pattern_message() {
    let frame = RespFrame::Array(vec![
        bulk("pmessage"),
        bulk("news.*"),
        bulk("news.tech"),
        bulk("hello"),
    ]);
    assert_eq!(
        SubscriptionMessage::parse(&frame),
        Some(SubscriptionMessage::PatternMessage {
            pattern: Bytes::from_static(b"news.*"),
            channel: Bytes::from_static(b"news.tech"),
            payload: Bytes::from_static(b"hello"),
        })
    );
}

#[test]
fn test_parse_shard_message() {
    let frame = RespFrame::Array(vec![bulk("smessage"), bulk("{s1}.events"), bulk("x")]);
    assert_eq!(
        SubscriptionMessage::parse(&frame),
        Some(SubscriptionMessage::ShardMessage {
            channel: Bytes::from_static(b"{s1}.events"),
            payload: Bytes::from_static(b"x"),
        })
    );
}

#[test]
fn test_parse_control_notifications() {
    let frame = RespFrame::Array(vec![bulk("subscribe"), bulk("news"), RespFrame::Integer(1)]);
    assert_eq!(
        SubscriptionMessage::parse(&frame),
        Some(SubscriptionMessage::Control {
            kind: ControlKind::Subscribe,
            name: Some(Bytes::from_static(b"news")),
            count: 1,
        })
    );

    // A nil name marks a blanket unsubscribe.
    let frame = RespFrame::Array(vec![bulk("punsubscribe"), RespFrame::Null, RespFrame::Integer(0)]);
    assert_eq!(
        SubscriptionMessage::parse(&frame),
        Some(SubscriptionMessage::Control {
            kind: ControlKind::PUnsubscribe,
            name: None,
            count: 0,
        })
    );
}

#[test]
fn test_unknown_shapes_are_noise() {
    let cases = vec![
        RespFrame::SimpleString("OK".to_string()),
        RespFrame::Integer(3),
        RespFrame::Array(vec![bulk("wat"), bulk("news"), bulk("hello")]),
        // Wrong arity for its tag.
        RespFrame::Array(vec![bulk("message"), bulk("news")]),
        RespFrame::Array(vec![bulk("subscribe"), bulk("news")]),
        RespFrame::Array(vec![]),
    ];
    for frame in cases {
        assert_eq!(SubscriptionMessage::parse(&frame), None, "frame {frame:?}");
    }
}

#[test]
fn test_payload_and_channel_accessors() {
    let msg = SubscriptionMessage::Message {
        channel: Bytes::from_static(b"news"),
        payload: Bytes::from_static(b"hello"),
    };
    assert_eq!(msg.payload(), Some(&Bytes::from_static(b"hello")));
    assert_eq!(msg.channel(), Some(&Bytes::from_static(b"news")));

    let control = SubscriptionMessage::Control {
        kind: ControlKind::Unsubscribe,
        name: None,
        count: 0,
    };
    assert_eq!(control.payload(), None);
    assert_eq!(control.channel(), None);
}
