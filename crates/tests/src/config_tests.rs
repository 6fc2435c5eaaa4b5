//! Integration tests for layered configuration loading

use std::{io::Write, path::PathBuf};
use vigil_core::config::AppConfig;

fn shipped_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/config.toml")
}

#[test]
fn test_shipped_config_is_valid() {
    let config = AppConfig::from_file(shipped_config()).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.socket_addr().unwrap().to_string(), "127.0.0.1:8670");
    assert_eq!(config.tracker.beat_promotion_streak, 3);
    assert!(config.node.genesis_id.is_none());
}

#[test]
fn test_invalid_values_are_reported() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[cache]\nexplain_capacity = {}", usize::MAX).unwrap();

    let config = AppConfig::from_file(file.path()).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_malformed_file_fails_to_load() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[host\nbind_port = ").unwrap();

    assert!(AppConfig::from_file(file.path()).is_err());
}

#[test]
fn test_environment_overrides_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[remote]\nreconnect_delay_seconds = 30\npoll_retry_delay_seconds = 7")
        .unwrap();

    // SAFETY: no other test in this binary reads or writes this variable.
    unsafe { std::env::set_var("VIGIL__REMOTE__RECONNECT_DELAY_SECONDS", "2") };
    let config = AppConfig::from_file(file.path());
    // SAFETY: as above.
    unsafe { std::env::remove_var("VIGIL__REMOTE__RECONNECT_DELAY_SECONDS") };

    let config = config.unwrap();
    assert_eq!(config.remote.reconnect_delay_seconds, 2);
    assert_eq!(config.remote.poll_retry_delay_seconds, 7);
}
