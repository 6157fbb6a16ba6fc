// Layered configuration loading

use common::config::{LockStorageBackend, RecordLogBackend, Settings};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_missing_files_fall_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let settings = Settings::load_from_path(dir.path()).unwrap();

    assert_eq!(settings.record_log.backend, RecordLogBackend::Memory);
    assert_eq!(settings.lock_storage.backend, LockStorageBackend::Memory);
    assert_eq!(settings.scheduler.poll_interval(), Duration::from_secs(45));
    assert!(settings.validate().is_ok());
}

#[test]
fn test_local_file_overrides_default_file() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("default.toml"),
        r#"
[record_log]
backend = "postgres"

[database]
url = "postgres://db.internal/posts"

[scheduler]
poll_interval_seconds = 30
grace_window_seconds = 120
"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("local.toml"),
        r#"
[scheduler]
poll_interval_seconds = 5

[identity]
owner = "npub1alice"
secret_key = "00112233445566778899aabbccddeeff"
"#,
    )
    .unwrap();

    let settings = Settings::load_from_path(dir.path()).unwrap();
    assert_eq!(settings.record_log.backend, RecordLogBackend::Postgres);
    assert_eq!(settings.database.url, "postgres://db.internal/posts");
    assert_eq!(settings.scheduler.poll_interval_seconds, 5);
    assert_eq!(settings.scheduler.grace_window_seconds, 120);
    assert_eq!(settings.scheduler.lock_timeout_seconds, 300);
    assert_eq!(settings.identity.owner.as_deref(), Some("npub1alice"));
    assert!(settings.validate().is_ok());
}

#[test]
fn test_environment_overrides_files() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("default.toml"),
        "[observability]\nlog_level = \"warn\"\n",
    )
    .unwrap();

    std::env::set_var("APP__OBSERVABILITY__LOG_LEVEL", "debug");
    let settings = Settings::load_from_path(dir.path());
    std::env::remove_var("APP__OBSERVABILITY__LOG_LEVEL");

    assert_eq!(settings.unwrap().observability.log_level, "debug");
}

#[test]
fn test_invalid_values_are_reported() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("default.toml"),
        "[scheduler]\npoll_interval_seconds = \"often\"\n",
    )
    .unwrap();

    assert!(Settings::load_from_path(dir.path()).is_err());
}
