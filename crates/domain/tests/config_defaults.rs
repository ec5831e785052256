use wb_domain::config::{ChainBreakBehavior, Config, PatternSet, ScrubMode};

#[test]
fn default_socket_path_is_under_run() {
    let config = Config::default();
    assert_eq!(config.server.socket_path, "/run/wardbridge/control.sock");
}

#[test]
fn explicit_socket_path_parses() {
    let toml_str = r#"
[server]
socket_path = "/tmp/wb-test.sock"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.socket_path, "/tmp/wb-test.sock");
}

#[test]
fn scrubber_defaults_are_compliance_safe() {
    let config = Config::default();
    assert_eq!(config.scrubber.mode, ScrubMode::Buffered);
    assert_eq!(config.scrubber.pattern_set, PatternSet::Standard);
}

#[test]
fn ttl_defaults_match_documented_values() {
    let config = Config::default();
    assert_eq!(config.containers.idle_timeout_secs, 1800);
    assert_eq!(config.containers.check_interval_secs, 60);
    assert_eq!(config.inject.token_ttl_secs, 300);
    assert_eq!(config.inject.accept_timeout_secs, 5);
    assert_eq!(config.zerotrust.max_verification_attempts, 5);
    assert_eq!(config.zerotrust.lockout_minutes, 30);
    assert_eq!(config.audit.retention_days, 90);
}

#[test]
fn chain_break_behavior_parses() {
    let toml_str = r#"
[audit]
on_chain_break = "degrade"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.audit.on_chain_break, ChainBreakBehavior::Degrade);
}
