use std::io::Write;

use conductor_core::config::AppConfig;
use conductor_core::ConductorError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[engine]
max_iterations = 8
debounce_ms = 25
node_timeout_secs = 5
event_capacity = 64

[log]
filter = "conductor=debug"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.max_iterations, 8);
    assert_eq!(config.engine.debounce_ms, 25);
    assert_eq!(config.engine.node_timeout_secs, 5);
    assert_eq!(config.engine.event_capacity, 64);
    assert_eq!(config.log.filter, "conductor=debug");
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("CONDUCTOR_TEST_LOG_FILTER", "conductor_graph=trace");

    let toml_content = r#"
[log]
filter = "${CONDUCTOR_TEST_LOG_FILTER}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.log.filter, "conductor_graph=trace");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[engine]\n").expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.max_iterations, 32);
    assert_eq!(config.engine.debounce_ms, 0);
    assert_eq!(config.engine.node_timeout_secs, 30);
    assert_eq!(config.engine.event_capacity, 256);
    assert_eq!(config.log.filter, "conductor=info,warn");
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("conductor.toml");

    assert!(matches!(
        AppConfig::load(&path),
        Err(ConductorError::ConfigNotFound(_))
    ));
    let config = AppConfig::load_or_default(&path).expect("defaults");
    assert_eq!(config.engine.max_iterations, 32);
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[engine]\nmax_iterations = \"many\"\n")
        .expect("write toml");

    assert!(matches!(
        AppConfig::load(tmp.path()),
        Err(ConductorError::Config(_))
    ));
}
