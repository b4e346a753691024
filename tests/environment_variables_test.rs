// Tests for POSE_INGEST_* environment variable handling.
//
// Environment variables are process-global, so every test holds ENV_LOCK
// through its EnvGuard. POSE_INGEST_CONFIG always points into a temp dir so
// a real config file on the machine never leaks into these tests.

use pose_ingest::{BackpressurePolicy, Config};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tempfile::TempDir;

static ENV_LOCK: Mutex<()> = Mutex::new(());

const VARS: [&str; 5] = [
    "POSE_INGEST_CONFIG",
    "POSE_INGEST_BIND",
    "POSE_INGEST_SINK_CAPACITY",
    "POSE_INGEST_BACKPRESSURE",
    "POSE_INGEST_IDLE_TIMEOUT",
];

/// Serializes env access, isolates the config path, and cleans up on drop.
struct EnvGuard {
    dir: TempDir,
    _lock: MutexGuard<'static, ()>,
}

impl EnvGuard {
    fn new() -> Self {
        let lock = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for key in VARS {
            env::remove_var(key);
        }
        let dir = TempDir::new().unwrap();
        env::set_var("POSE_INGEST_CONFIG", dir.path().join("config.json"));
        Self { dir, _lock: lock }
    }

    fn set(&self, key: &str, value: &str) {
        env::set_var(key, value);
    }

    fn config_path(&self) -> PathBuf {
        self.dir.path().join("config.json")
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for key in VARS {
            env::remove_var(key);
        }
    }
}

#[test]
fn test_no_file_no_env_gives_defaults() {
    let _guard = EnvGuard::new();

    let config = Config::load().unwrap();

    assert_eq!(config, Config::default());
}

#[test]
fn test_config_path_env_var() {
    let guard = EnvGuard::new();

    assert_eq!(Config::default_path().unwrap(), guard.config_path());

    fs::write(guard.config_path(), r#"{"bind":"127.0.0.1:9100","sink_capacity":4}"#).unwrap();
    let config = Config::load().unwrap();

    assert_eq!(config.bind, "127.0.0.1:9100");
    assert_eq!(config.sink_capacity, 4);
}

#[test]
fn test_env_override_bind() {
    let guard = EnvGuard::new();
    guard.set("POSE_INGEST_BIND", "127.0.0.1:9200");

    let config = Config::load().unwrap();

    assert_eq!(config.bind, "127.0.0.1:9200");
}

#[test]
fn test_env_override_sink_capacity() {
    let guard = EnvGuard::new();
    guard.set("POSE_INGEST_SINK_CAPACITY", "32");

    let config = Config::load().unwrap();

    assert_eq!(config.sink_capacity, 32);
}

#[test]
fn test_env_override_sink_capacity_invalid() {
    let guard = EnvGuard::new();
    guard.set("POSE_INGEST_SINK_CAPACITY", "lots");

    let config = Config::load().unwrap();

    // Should fall back to default
    assert_eq!(config.sink_capacity, 256);
}

#[test]
fn test_env_override_backpressure() {
    let guard = EnvGuard::new();
    guard.set("POSE_INGEST_BACKPRESSURE", "drop");

    let config = Config::load().unwrap();

    assert_eq!(config.backpressure, BackpressurePolicy::Drop);
}

#[test]
fn test_env_override_backpressure_invalid() {
    let guard = EnvGuard::new();
    guard.set("POSE_INGEST_BACKPRESSURE", "block");

    let config = Config::load().unwrap();

    assert_eq!(config.backpressure, BackpressurePolicy::Wait);
}

#[test]
fn test_env_override_idle_timeout() {
    let guard = EnvGuard::new();
    guard.set("POSE_INGEST_IDLE_TIMEOUT", "15");

    let config = Config::load().unwrap();

    assert_eq!(config.idle_timeout(), Some(Duration::from_secs(15)));
}

#[test]
fn test_env_override_idle_timeout_invalid() {
    let guard = EnvGuard::new();
    guard.set("POSE_INGEST_IDLE_TIMEOUT", "soon");

    let config = Config::load().unwrap();

    assert_eq!(config.idle_timeout(), None);
}

#[test]
fn test_env_wins_over_file() {
    let guard = EnvGuard::new();
    fs::write(guard.config_path(), r#"{"bind":"127.0.0.1:9300","backpressure":"drop"}"#).unwrap();
    guard.set("POSE_INGEST_BIND", "127.0.0.1:9400");

    let config = Config::load().unwrap();

    assert_eq!(config.bind, "127.0.0.1:9400");
    // Untouched by env, so the file value stays.
    assert_eq!(config.backpressure, BackpressurePolicy::Drop);
}

#[test]
fn test_explicit_path_still_gets_env_overrides() {
    let guard = EnvGuard::new();
    let other = guard.dir.path().join("other.json");
    fs::write(&other, r#"{"sink_capacity":8}"#).unwrap();
    guard.set("POSE_INGEST_SINK_CAPACITY", "16");

    let config = Config::load_with(Some(&other)).unwrap();

    assert_eq!(config.sink_capacity, 16);
}
