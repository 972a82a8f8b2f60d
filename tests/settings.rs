use std::time::Duration;

use serial_test::serial;
use tempfile::tempdir;
use window_overlay::overlay::SyncConfig;
use window_overlay::settings::{OverlaySettings, SETTINGS_ENV};

#[test]
fn missing_or_empty_file_yields_defaults() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("none.json");
    assert_eq!(OverlaySettings::load(&missing).unwrap(), OverlaySettings::default());

    let empty = dir.path().join("empty.json");
    std::fs::write(&empty, "  \n").unwrap();
    assert_eq!(OverlaySettings::load(&empty).unwrap(), OverlaySettings::default());
}

#[test]
fn partial_file_keeps_field_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("overlay_settings.json");
    std::fs::write(
        &path,
        r#"{ "debug_logging": true, "tracker": { "timeout_ms": 3000 }, "sync": { "tolerance_px": 4 } }"#,
    )
    .unwrap();

    let settings = OverlaySettings::load(&path).unwrap();
    assert!(settings.debug_logging);
    assert_eq!(settings.tracker.timeout_ms, 3000);
    assert_eq!(settings.tracker.poll_interval_ms, 150);
    assert!(settings.tracker.ignore_preexisting);
    assert_eq!(settings.sync.tolerance_px, 4);
    assert_eq!(settings.sync.active_rate_hz, SyncConfig::default().active_rate_hz);
    assert_eq!(settings.stop_join_timeout_ms, 2000);

    let config = settings.manager_config();
    assert_eq!(config.tracker.timeout, Duration::from_secs(3));
    assert_eq!(config.tracker.poll_interval, Duration::from_millis(150));
}

#[test]
fn malformed_file_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(OverlaySettings::load(&path).is_err());
}

#[test]
fn save_then_load_preserves_values() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("overlay_settings.json");
    let mut settings = OverlaySettings::default();
    settings.log_file = Some(dir.path().join("overlay.log"));
    settings.sync.always_on_top = false;
    settings.tracker.include_child_processes = false;
    settings.save(&path).unwrap();

    let loaded = OverlaySettings::load(&path).unwrap();
    assert_eq!(loaded, settings);
    assert!(!loaded.launcher().include_child_processes);
}

#[test]
#[serial]
fn env_var_overrides_default_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("custom.json");
    std::env::set_var(SETTINGS_ENV, &path);
    let resolved = OverlaySettings::default_path();
    std::env::remove_var(SETTINGS_ENV);
    assert_eq!(resolved, path);
}
