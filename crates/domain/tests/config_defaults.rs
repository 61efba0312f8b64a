use baton_domain::config::{Config, ConfigSeverity, GraphTransport};

#[test]
fn default_effectiveness_bounds() {
    let config = Config::default();
    assert!((config.fsm.initial_effectiveness - 0.8).abs() < f64::EPSILON);
    assert!((config.fsm.min_effectiveness - 0.3).abs() < f64::EPSILON);
    assert!((config.fsm.max_effectiveness - 1.0).abs() < f64::EPSILON);
}

#[test]
fn default_retry_policy() {
    let config = Config::default();
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.retry.backoff_base_ms, 1000);
    assert_eq!(config.retry.drain_interval_secs, 5);
}

#[test]
fn default_cache_retention_is_a_day() {
    let config = Config::default();
    assert_eq!(config.cache.retention_hours, 24);
    assert_eq!(config.cache.cleanup_interval_secs, 3600);
}

#[test]
fn default_transport_is_mcp() {
    let config = Config::default();
    assert_eq!(config.graph_store.transport, GraphTransport::Mcp);
    assert_eq!(config.graph_store.base_url, "http://localhost:3100");
    assert_eq!(config.graph_store.timeout_ms, 8000);
    assert!(!config.graph_store.ephemeral);
}

#[test]
fn defaults_validate_clean() {
    assert!(Config::default().validate().is_empty());
}

#[test]
fn explicit_sections_parse() {
    let toml_str = r#"
[retry]
max_attempts = 5
backoff_base_ms = 250

[graph_store]
transport = "memory"
ephemeral = true
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.backoff_base_ms, 250);
    assert_eq!(config.retry.drain_interval_secs, 5);
    assert_eq!(config.graph_store.transport, GraphTransport::Memory);
    assert!(config.graph_store.ephemeral);
}

#[test]
fn validation_rejects_inverted_bounds() {
    let mut config = Config::default();
    config.fsm.min_effectiveness = 0.9;
    config.fsm.max_effectiveness = 0.5;
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error && i.field == "fsm.min_effectiveness"));
    assert!(issues
        .iter()
        .any(|i| i.field == "fsm.initial_effectiveness"));
}

#[test]
fn validation_flags_zero_drain_interval() {
    let mut config = Config::default();
    config.retry.drain_interval_secs = 0;
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error && i.field == "retry.drain_interval_secs"));
}

#[test]
fn env_overrides_apply() {
    std::env::set_var("BATON_RETRY_MAX_ATTEMPTS", "7");
    std::env::set_var("BATON_EPHEMERAL", "true");
    std::env::set_var("BATON_GRAPH_URL", "http://graph.internal:9000");

    let config = Config::from_env();
    assert_eq!(config.retry.max_attempts, 7);
    assert!(config.graph_store.ephemeral);
    assert_eq!(config.graph_store.base_url, "http://graph.internal:9000");

    std::env::remove_var("BATON_RETRY_MAX_ATTEMPTS");
    std::env::remove_var("BATON_EPHEMERAL");
    std::env::remove_var("BATON_GRAPH_URL");
}

#[test]
fn load_reads_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("baton.toml");
    std::fs::write(
        &path,
        r#"
[cache]
retention_hours = 48
"#,
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.cache.retention_hours, 48);
}
