// tests/unit_client_test.rs

#[path = "integration/test_helpers.rs"]
#[allow(dead_code)]
mod test_helpers;

use bytes::Bytes;
use carnelian::client::Client;
use carnelian::core::protocol::RespFrame;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use test_helpers::*;

/// A scripted standalone server with a real key/value store behind SET, GET,
/// DEL, EXISTS, INCR and HINCRBY.
async fn store_server() -> MockServer {
    let store: Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>> = Arc::new(Mutex::new(HashMap::new()));
    MockServer::start(move |frame| {
        if let Some(replies) = standalone_basics(frame) {
            return replies;
        }
        let mut store = store.lock();
        let key = frame_arg(frame, 1).map(|b| b.to_vec()).unwrap_or_default();
        match cmd_name(frame).as_str() {
            "SET" => {
                let value = frame_arg(frame, 2).map(|b| b.to_vec()).unwrap_or_default();
                store.insert(key, value);
                vec![simple("OK")]
            }
            "GET" => match store.get(&key) {
                Some(value) => {
                    vec![RespFrame::BulkString(Bytes::copy_from_slice(value))]
                }
                None => vec![nil()],
            },
            "DEL" => {
                let mut removed = 0;
                for i in 1..frame_len(frame) {
                    if let Some(k) = frame_arg(frame, i)
                        && store.remove(k.as_ref()).is_some()
                    {
                        removed += 1;
                    }
                }
                vec![int(removed)]
            }
            "EXISTS" => vec![int(i64::from(store.contains_key(&key)))],
            "INCR" => {
                let next = store
                    .get(&key)
                    .and_then(|v| std::str::from_utf8(v).ok())
                    .and_then(|s| s.parse::<i64>().ok())
                    .unwrap_or(0)
                    + 1;
                store.insert(key, next.to_string().into_bytes());
                vec![int(next)]
            }
            "HINCRBY" => {
                // Flat emulation: field is folded into the storage key.
                let field = frame_arg(frame, 2).map(|b| b.to_vec()).unwrap_or_default();
                let delta: i64 = frame_arg(frame, 3)
                    .and_then(|b| String::from_utf8_lossy(&b).parse().ok())
                    .unwrap_or(0);
                let mut hash_key = key;
                hash_key.extend_from_slice(b"\x00");
                hash_key.extend_from_slice(&field);
                let next = store
                    .get(&hash_key)
                    .and_then(|v| std::str::from_utf8(v).ok())
                    .and_then(|s| s.parse::<i64>().ok())
                    .unwrap_or(0)
                    + delta;
                store.insert(hash_key, next.to_string().into_bytes());
                vec![int(next)]
            }
            _ => vec![RespFrame::Error("ERR unknown command".to_string())],
        }
    })
    .await
}

#[tokio::test]
async fn test_set_get_del_roundtrip() {
    let server = store_server().await;
    let client = Client::connect(server.config()).await.unwrap();

    client.set("key", "value").await.unwrap();
    assert_eq!(
        client.get("key").await.unwrap(),
        Some(Bytes::from_static(b"value"))
    );
    assert_eq!(client.del(&["key"]).await.unwrap(), 1);
    assert_eq!(client.get("key").await.unwrap(), None);
}

#[tokio::test]
async fn test_ping_and_exists() {
    let server = store_server().await;
    let client = Client::connect(server.config()).await.unwrap();

    client.ping().await.unwrap();
    assert!(!client.exists("missing").await.unwrap());
    client.set("present", "1").await.unwrap();
    assert!(client.exists("present").await.unwrap());
}

#[tokio::test]
async fn test_incr_and_hincrby_with_explicit_field() {
    let server = store_server().await;
    let client = Client::connect(server.config()).await.unwrap();

    assert_eq!(client.incr("counter").await.unwrap(), 1);
    assert_eq!(client.incr("counter").await.unwrap(), 2);
    assert_eq!(client.hincrby("h", "visits", 5).await.unwrap(), 5);
    assert_eq!(client.hincrby("h", "visits", -2).await.unwrap(), 3);
    // Distinct fields of the same hash are independent.
    assert_eq!(client.hincrby("h", "errors", 1).await.unwrap(), 1);
}

#[tokio::test]
async fn test_server_error_surfaces_with_prefix() {
    let server = store_server().await;
    let client = Client::connect(server.config()).await.unwrap();

    let err = client
        .execute(carnelian::client::Request::new("NOSUCH").key("k".to_string()))
        .await
        .unwrap_err();
    match err {
        carnelian::core::errors::ClientError::Server { prefix, message } => {
            assert_eq!(prefix, "ERR");
            assert_eq!(message, "unknown command");
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_standalone_validates_hash_tags_for_portability() {
    let server = store_server().await;
    let client = Client::connect(server.config()).await.unwrap();

    // Same tag: legal.
    client
        .execute(
            carnelian::client::Request::new("DEL")
                .key("{a}:x".to_string())
                .key("{a}:y".to_string())
                .write(),
        )
        .await
        .unwrap();

    // Cross-slot tags fail even though a standalone server could serve them.
    let err = client.del(&["{a}:x", "{b}:y"]).await.unwrap_err();
    assert!(matches!(
        err,
        carnelian::core::errors::ClientError::CrossSlot
    ));
}

#[tokio::test]
async fn test_publish_reports_receiver_count() {
    let server = MockServer::start(|frame| {
        standalone_basics(frame).unwrap_or_else(|| match cmd_name(frame).as_str() {
            "PUBLISH" | "SPUBLISH" => vec![int(2)],
            _ => vec![RespFrame::Error("ERR unknown command".to_string())],
        })
    })
    .await;
    let client = Client::connect(server.config()).await.unwrap();

    assert_eq!(client.publish("news", "hi").await.unwrap(), 2);
    // Sharded publish routes by the shard channel's slot.
    assert_eq!(client.spublish("{s1}:news", "hi").await.unwrap(), 2);
}

#[tokio::test]
async fn test_info_returns_section_text() {
    let server = store_server().await;
    let client = Client::connect(server.config()).await.unwrap();

    let info = client.info(Some("cluster")).await.unwrap();
    assert!(info.contains("cluster_enabled:0"));
}

#[tokio::test]
async fn test_on_each_primary_standalone() {
    let server = store_server().await;
    let client = Client::connect(server.config()).await.unwrap();

    let replies = client
        .on_each_primary(carnelian::client::Request::new("PING"))
        .await
        .unwrap();
    assert_eq!(replies.len(), 1);
    assert!(matches!(
        &replies[0].1,
        carnelian::core::protocol::RespValue::SimpleString(s) if s == "PONG"
    ));
}
