//! Orchestrator assembly tests: config files, rule files and task lifecycle.

use std::path::Path;

use irongate_core::config::IronGateConfig;
use irongate_daemon::Orchestrator;
use irongate_daemon::gateway::Gateway;
use irongate_qos::ClassId;

const NAT_RULES: &str = r#"
[[rules]]
nat_type = "snat"
src = "192.168.1.0/24"
nat_ip = "203.0.113.1"
"#;

const QOS_RULES: &str = r#"
[[rules]]
protocol = "tcp"
dst_ports = "22"
target_class = 6

[[rules]]
protocol = "tcp"
target_class = 1
"#;

fn write(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path.display().to_string()
}

#[tokio::test]
async fn rule_files_are_loaded_in_file_order() {
    // Given: a config pointing at both rule files
    let dir = tempfile::tempdir().unwrap();
    let mut config = IronGateConfig::default();
    config.nat.rules_path = Some(write(dir.path(), "nat.toml", NAT_RULES));
    config.qos.rules_path = Some(write(dir.path(), "qos.toml", QOS_RULES));

    // When: building the orchestrator
    let orch = Orchestrator::build_from_config(config).await.unwrap();

    // Then: every rule is present and the last file entry is matched first
    let loaded = orch.loaded_rules();
    assert_eq!((loaded.nat, loaded.qos), (1, 2));
    let qos_rules = orch.gateway().qos().rules();
    assert_eq!(qos_rules[0].rule.target_class, ClassId::BACKGROUND);
    assert_eq!(qos_rules[1].rule.target_class, ClassId::INTERNETWORK_CONTROL);
}

#[tokio::test]
async fn invalid_rule_file_fails_the_build() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = IronGateConfig::default();
    config.qos.rules_path = Some(write(
        dir.path(),
        "qos.toml",
        "[[rules]]\ntarget_class = 12\n",
    ));

    let err = Orchestrator::build_from_config(config).await.err().unwrap();
    assert!(err.to_string().contains("failed to load rules"), "got: {err}");
}

#[tokio::test]
async fn missing_rule_file_fails_the_build() {
    let mut config = IronGateConfig::default();
    config.nat.rules_path = Some("/nonexistent/irongate/nat.toml".to_owned());
    assert!(Orchestrator::build_from_config(config).await.is_err());
}

#[tokio::test]
async fn disabled_section_ignores_its_rule_file() {
    let mut config = IronGateConfig::default();
    config.nat.enabled = false;
    config.nat.rules_path = Some("/nonexistent/irongate/nat.toml".to_owned());

    let gw = Gateway::new(&config);
    let loaded = gw.load_rule_files(&config).await.unwrap();
    assert_eq!(loaded.nat, 0);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let mut config = IronGateConfig::default();
    config.qos.queue_capacity = 0;
    assert!(Orchestrator::build_from_config(config).await.is_err());
}

#[tokio::test]
async fn build_from_example_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let example = include_str!("../../irongate.toml.example");
    let path = write(dir.path(), "irongate.toml", example);

    let mut orch = Orchestrator::build(Path::new(&path)).await.unwrap();
    assert_eq!(orch.config().qos.queue_capacity, 256);
    assert_eq!(orch.gateway().qos().class_stats(ClassId::VOICE).priority, 6);

    orch.start();
    assert_eq!(orch.task_count(), 1);
    orch.shutdown().await;
    assert_eq!(orch.task_count(), 0);
}
