// tests/unit_config_test.rs

use carnelian::config::{BackoffStrategy, ConnectionConfig};
use std::time::Duration;

#[test]
fn test_defaults() {
    let config = ConnectionConfig::default();
    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.port, 6379);
    assert_eq!(config.database, 0);
    assert!(config.username.is_none());
    assert!(config.password.is_none());
    assert!(config.tls.is_none());
    assert!(config.retry.enabled);
    assert_eq!(config.retry.max_attempts, 3);
    assert!(!config.keepalive.enabled);
    assert_eq!(config.addr(), "127.0.0.1:6379");
    assert_eq!(config.connect_timeout(), Duration::from_millis(2_000));
}

#[test]
fn test_deserialize_with_partial_fields() {
    let config: ConnectionConfig = serde_json::from_str(
        r#"{
            "host": "cache.internal",
            "port": 7001,
            "password": "hunter2",
            "retry": { "enabled": false },
            "keepalive": { "enabled": true, "delay_secs": 30 }
        }"#,
    )
    .unwrap();
    assert_eq!(config.addr(), "cache.internal:7001");
    assert_eq!(config.password.as_deref(), Some("hunter2"));
    assert!(!config.retry.enabled);
    // Unspecified retry fields fall back to their defaults.
    assert_eq!(config.retry.max_attempts, 3);
    assert!(config.keepalive.enabled);
    assert_eq!(config.keepalive.delay_secs, 30);
}

#[test]
fn test_fixed_backoff() {
    let backoff = BackoffStrategy::Fixed { millis: 250 };
    assert_eq!(backoff.delay(1), Duration::from_millis(250));
    assert_eq!(backoff.delay(9), Duration::from_millis(250));
}

#[test]
fn test_exponential_backoff_doubles_and_caps() {
    let backoff = BackoffStrategy::Exponential {
        base_millis: 50,
        cap_millis: 400,
    };
    assert_eq!(backoff.delay(1), Duration::from_millis(50));
    assert_eq!(backoff.delay(2), Duration::from_millis(100));
    assert_eq!(backoff.delay(3), Duration::from_millis(200));
    assert_eq!(backoff.delay(4), Duration::from_millis(400));
    assert_eq!(backoff.delay(5), Duration::from_millis(400));
    // Large attempt counts must not overflow.
    assert_eq!(backoff.delay(64), Duration::from_millis(400));
}

#[test]
fn test_for_node_inherits_credentials_and_resets_database() {
    let base = ConnectionConfig {
        database: 5,
        username: Some("svc".to_string()),
        password: Some("secret".to_string()),
        ..ConnectionConfig::default()
    };
    let node = base.for_node("10.0.0.9", 7002);
    assert_eq!(node.addr(), "10.0.0.9:7002");
    assert_eq!(node.database, 0);
    assert_eq!(node.username.as_deref(), Some("svc"));
    assert_eq!(node.password.as_deref(), Some("secret"));
    assert_eq!(node.retry.max_attempts, base.retry.max_attempts);
}
