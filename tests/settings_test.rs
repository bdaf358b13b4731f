use qontinui_feedback::settings::{load_or_init, load_settings, save_settings, PersistentSettings};
use tempfile::TempDir;

#[test]
fn test_load_missing_file() {
    let dir = TempDir::new().unwrap();
    let settings = load_settings(&dir.path().join("nonexistent.json"));
    assert_eq!(settings, PersistentSettings::default());
}

#[test]
fn test_load_invalid_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, "not json at all {{{").unwrap();
    // Should return defaults instead of panicking
    assert_eq!(load_settings(&path), PersistentSettings::default());
}

#[test]
fn test_save_and_load_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");

    let settings = PersistentSettings {
        run_idle_minutes: Some(15),
        failure_window_hours: None,
        max_attachment_mb: Some(4),
    };
    save_settings(&path, &settings);
    assert_eq!(load_settings(&path), settings);
}

#[test]
fn test_partial_file_leaves_other_fields_unset() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, r#"{"failure_window_hours": 6}"#).unwrap();

    let settings = load_settings(&path);
    assert_eq!(settings.failure_window_hours, Some(6));
    assert!(settings.run_idle_minutes.is_none());
}

#[test]
fn test_load_or_init_seeds_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("feedback-settings.json");

    let settings = load_or_init(&path);
    assert!(path.exists());
    assert_eq!(settings, PersistentSettings::with_defaults());

    // an existing file is never overwritten
    std::fs::write(&path, r#"{"run_idle_minutes": 3}"#).unwrap();
    assert_eq!(load_or_init(&path).run_idle_minutes, Some(3));
}
