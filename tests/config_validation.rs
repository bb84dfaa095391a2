//! Configuration loading and validation.

use std::time::Duration;

use packet_link::config::LinkConfig;
use packet_link::core::{ByteOrder, Protocol};

#[test]
fn test_missing_sections_fall_back_to_defaults() {
    let config = LinkConfig::from_toml("[protocol]\nhead_len = 8\n").unwrap();
    assert_eq!(config.protocol.head_len, 8);
    assert_eq!(config.protocol.byte_order, ByteOrder::BigEndian);
    assert_eq!(config.session.send_queue_size, 1);
    assert_eq!(config.server.max_sessions, 0);
    assert!(config.validate_strict().is_ok());
}

#[test]
fn test_malformed_toml_is_config_error() {
    assert!(LinkConfig::from_toml("[protocol\nhead_len = 4").is_err());
}

#[test]
fn test_validation_collects_every_problem() {
    let config = LinkConfig::from_toml(
        r#"
        [protocol]
        head_len = 5

        [session]
        send_queue_size = 0

        [pool]
        region_size = 0
        "#,
    )
    .unwrap();

    let errors = config.validate();
    assert_eq!(errors.len(), 3);
    assert!(errors[0].contains("head_len"));
}

#[test]
fn test_auth_key_selects_authenticated_protocol() {
    let config = LinkConfig::from_toml(
        r#"
        [protocol]
        head_len = 2
        byte_order = "little_endian"
        max_read = 1024
        max_write = 1024
        auth_key = "secret"
        "#,
    )
    .unwrap();
    assert!(config.validate_strict().is_ok());
    let protocol = config.protocol.build_protocol().unwrap();
    assert!(matches!(protocol, Protocol::Auth(_)));
}

#[test]
fn test_empty_auth_key_rejected() {
    let config = LinkConfig::from_toml("[protocol]\nauth_key = \"\"\n").unwrap();
    assert!(config.validate_strict().is_err());
}

#[test]
fn test_auth_split_limits_rejected() {
    // The authenticated framing carries one size limit for both directions.
    let config = LinkConfig::from_toml(
        r#"
        [protocol]
        auth_key = "secret"
        max_read = 1024
        max_write = 2048
        "#,
    )
    .unwrap();
    assert!(config.validate_strict().is_err());
}

#[test]
fn test_env_overrides() {
    // Single test for all variables so parallel tests never race the
    // process environment.
    std::env::set_var("PACKET_LINK_HEAD_LEN", "2");
    std::env::set_var("PACKET_LINK_BYTE_ORDER", "little_endian");
    std::env::set_var("PACKET_LINK_MAX_READ", "4096");
    std::env::set_var("PACKET_LINK_MAX_WRITE", "4096");
    std::env::set_var("PACKET_LINK_SEND_QUEUE_SIZE", "16");
    std::env::set_var("PACKET_LINK_ASYNC_SEND_TIMEOUT_MS", "750");
    std::env::set_var("PACKET_LINK_POOL_REGION_SIZE", "8192");
    std::env::set_var("PACKET_LINK_MAX_SESSIONS", "64");

    let config = LinkConfig::from_env().unwrap();
    assert_eq!(config.protocol.head_len, 2);
    assert_eq!(config.protocol.byte_order, ByteOrder::LittleEndian);
    assert_eq!(config.protocol.max_read, 4096);
    assert_eq!(config.protocol.max_write, 4096);
    assert_eq!(config.session.send_queue_size, 16);
    assert_eq!(config.session.async_send_timeout, Duration::from_millis(750));
    assert_eq!(config.pool.region_size, 8192);
    assert_eq!(config.server.max_sessions, 64);

    for var in [
        "PACKET_LINK_HEAD_LEN",
        "PACKET_LINK_BYTE_ORDER",
        "PACKET_LINK_MAX_READ",
        "PACKET_LINK_MAX_WRITE",
        "PACKET_LINK_SEND_QUEUE_SIZE",
        "PACKET_LINK_ASYNC_SEND_TIMEOUT_MS",
        "PACKET_LINK_POOL_REGION_SIZE",
        "PACKET_LINK_MAX_SESSIONS",
    ] {
        std::env::remove_var(var);
    }
}
