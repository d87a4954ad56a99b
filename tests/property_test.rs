// tests/property_test.rs

//! Property-based tests for the slot algorithm and the RESP codec.

use bytes::{Bytes, BytesMut};
use carnelian::core::cluster::slot::{NUM_SLOTS, hash_slot};
use carnelian::core::protocol::{RespFrame, RespFrameCodec};
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

/// A frame strategy covering every reply kind, with bounded nesting.
fn frame_strategy() -> impl Strategy<Value = RespFrame> {
    let leaf = prop_oneof![
        "[a-zA-Z0-9 ._-]{0,24}".prop_map(RespFrame::SimpleString),
        "[a-zA-Z0-9 ._-]{0,24}".prop_map(RespFrame::Error),
        any::<i64>().prop_map(RespFrame::Integer),
        proptest::collection::vec(any::<u8>(), 0..48)
            .prop_map(|bytes| RespFrame::BulkString(Bytes::from(bytes))),
        Just(RespFrame::Null),
        Just(RespFrame::NullArray),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        proptest::collection::vec(inner, 0..4).prop_map(RespFrame::Array)
    })
}

proptest! {
    #[test]
    fn prop_slot_is_always_in_range(key in proptest::collection::vec(any::<u8>(), 0..64)) {
        prop_assert!((hash_slot(&key) as usize) < NUM_SLOTS);
    }

    #[test]
    fn prop_hash_tag_equals_slot_of_tag(
        prefix in "[a-z0-9:]{0,12}",
        tag in "[a-z0-9]{1,12}",
        suffix in "[a-z0-9:{}]{0,12}",
    ) {
        let key = format!("{prefix}{{{tag}}}{suffix}");
        prop_assert_eq!(hash_slot(key.as_bytes()), hash_slot(tag.as_bytes()));
    }

    #[test]
    fn prop_keys_sharing_a_tag_share_a_slot(
        a in "[a-z0-9:]{0,12}",
        b in "[a-z0-9:]{0,12}",
        tag in "[a-z0-9]{1,12}",
    ) {
        let first = format!("{a}{{{tag}}}");
        let second = format!("{b}{{{tag}}}:trailer");
        prop_assert_eq!(hash_slot(first.as_bytes()), hash_slot(second.as_bytes()));
    }

    #[test]
    fn prop_codec_roundtrips_any_frame(frame in frame_strategy()) {
        let mut buf = BytesMut::new();
        RespFrameCodec.encode(frame.clone(), &mut buf).unwrap();
        let mut codec = RespFrameCodec;
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        prop_assert_eq!(decoded, frame);
        prop_assert!(buf.is_empty(), "decode must consume exactly one reply");
    }

    #[test]
    fn prop_strict_prefix_is_incomplete(
        frame in frame_strategy(),
        cut in any::<proptest::sample::Index>(),
    ) {
        let mut wire = BytesMut::new();
        RespFrameCodec.encode(frame, &mut wire).unwrap();
        let cut = cut.index(wire.len().max(1));
        if cut < wire.len() {
            let mut partial = BytesMut::from(&wire[..cut]);
            let mut codec = RespFrameCodec;
            // A strict prefix of one reply never decodes to anything.
            prop_assert!(codec.decode(&mut partial).unwrap().is_none());
        }
    }
}
