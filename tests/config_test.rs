use clap::Parser;
use std::path::PathBuf;

use qontinui_feedback::config::*;
use qontinui_feedback::settings::PersistentSettings;

#[test]
fn test_default_constants() {
    assert_eq!(DEFAULT_FEEDBACK_PORT, 9877);
    assert_eq!(DEFAULT_RUN_IDLE_MINUTES, 30);
    assert_eq!(DEFAULT_FAILURE_WINDOW_HOURS, 24);
    assert_eq!(SETTINGS_FILE, "feedback-settings.json");
}

#[test]
fn test_defaults_without_flags_or_settings() {
    let args = CliArgs::parse_from(["qontinui-feedback"]);
    assert!(args.command.is_none());

    let config = FeedbackConfig::from_args(args, &PersistentSettings::default());
    assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
    assert_eq!(config.listen_addr(), "127.0.0.1:9877");
    assert_eq!(config.run_idle_minutes, DEFAULT_RUN_IDLE_MINUTES);
    assert_eq!(config.failure_window_hours, DEFAULT_FAILURE_WINDOW_HOURS);
    assert_eq!(config.max_attachment_bytes, DEFAULT_MAX_ATTACHMENT_MB * 1024 * 1024);
    assert!(config.log_dir.is_none());
}

#[test]
fn test_settings_file_overrides_defaults() {
    let args = CliArgs::parse_from(["qontinui-feedback", "-d", "/tmp/fb"]);
    let settings = PersistentSettings {
        run_idle_minutes: Some(5),
        failure_window_hours: Some(48),
        max_attachment_mb: None,
    };
    let config = FeedbackConfig::from_args(args, &settings);
    assert_eq!(config.run_idle_minutes, 5);
    assert_eq!(config.failure_window_hours, 48);
    assert_eq!(config.settings_path(), PathBuf::from("/tmp/fb/feedback-settings.json"));
}

#[test]
fn test_flags_override_settings_file() {
    let args = CliArgs::parse_from([
        "qontinui-feedback",
        "--run-idle-minutes",
        "90",
        "--max-attachment-mb",
        "2",
        "--port",
        "9000",
    ]);
    let settings = PersistentSettings {
        run_idle_minutes: Some(5),
        failure_window_hours: None,
        max_attachment_mb: Some(50),
    };
    let config = FeedbackConfig::from_args(args, &settings);
    assert_eq!(config.run_idle_minutes, 90);
    assert_eq!(config.max_attachment_bytes, 2 * 1024 * 1024);
    assert_eq!(config.port, 9000);
}

#[test]
fn test_non_positive_values_are_clamped() {
    let args = CliArgs::parse_from(["qontinui-feedback", "--run-idle-minutes", "0"]);
    let config = FeedbackConfig::from_args(args, &PersistentSettings::default());
    assert_eq!(config.run_idle_minutes, 1);
}

#[test]
fn test_subcommands() {
    let args = CliArgs::parse_from(["qontinui-feedback", "serve", "--with-tools"]);
    assert_eq!(args.command, Some(Command::Serve { with_tools: true }));

    let args = CliArgs::parse_from(["qontinui-feedback", "-d", "/data", "tools"]);
    assert_eq!(args.command, Some(Command::Tools));
    assert_eq!(args.data_dir, PathBuf::from("/data"));

    let args = CliArgs::parse_from(["qontinui-feedback", "rebuild-index"]);
    assert_eq!(args.command, Some(Command::RebuildIndex));
}
