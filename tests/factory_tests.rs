
use ee_agent::config::{AgentConfig, LaunchTypeConfig};
use ee_agent::error::AgentError;
use ee_agent::supervisor::{create_supervisor, LaunchType};
use test_harness::{direct_config, exec_params};

fn full_config(dir: &std::path::Path, launch_type: &str) -> AgentConfig {
    AgentConfig::new(
        "factory-agent",
        LaunchTypeConfig::new(launch_type)
            .with_supervisor_directory(dir.join("supervisor"))
            .with_container_directory(dir.join("container")),
    )
}

#[test]
fn test_each_launch_type_builds_its_supervisor() {
    let dir = tempfile::tempdir().unwrap();
    for launch_type in LaunchType::ALL {
        let supervisor = create_supervisor(&full_config(dir.path(), launch_type.as_str())).unwrap();
        assert_eq!(supervisor.launch_type(), launch_type);
        assert!(supervisor.get_all().is_empty());
    }
}

#[test]
fn test_unknown_launch_type_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = create_supervisor(&full_config(dir.path(), "fork-and-pray"))
        .err()
        .unwrap();
    assert!(err.is_configuration());
    assert_eq!(err.to_string(), "fork-and-pray is an unknown launch type");
}

#[test]
fn test_missing_directory_is_named() {
    let config = AgentConfig::new("factory-agent", LaunchTypeConfig::new("direct-supervised"));
    let err = create_supervisor(&config).err().unwrap();
    assert!(matches!(err, AgentError::MissingParameter(ref field) if field == "supervisor_directory"));
    assert_eq!(err.to_string(), "the supervisor_directory parameter must be set");
}

#[test]
fn test_supervisor_directory_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("a/b/c");
    create_supervisor(&direct_config(&nested, 1)).unwrap();
    assert!(nested.is_dir());
}

#[test]
fn test_configured_slots_reach_supervisor() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = create_supervisor(&direct_config(dir.path(), 1)).unwrap();

    let first = supervisor.run("sleep-0", &exec_params("sleep", &["30"]));
    let second = supervisor.run("sleep-1", &exec_params("sleep", &["30"]));
    assert!(first.state().is_admitted());
    assert!(!second.state().is_admitted());

    first.cleanup();
    second.cleanup();
}

#[test]
fn test_config_from_yaml_builds_supervisor() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!(
        "name: yaml-agent\nslots: 3\nlaunch_type:\n  name: container-unsupervised\n  supervisor_directory: {}\n  container_directory: {}\n",
        dir.path().join("s").display(),
        dir.path().join("c").display(),
    );
    let path = dir.path().join("agent.yml");
    std::fs::write(&path, yaml).unwrap();

    let config = AgentConfig::load(&path).unwrap();
    assert_eq!(config.slots, 3);
    let supervisor = create_supervisor(&config).unwrap();
    assert_eq!(supervisor.launch_type(), LaunchType::ContainerUnsupervised);
}
