// ABOUTME: Integration tests for loading drydock.yml from disk.
// ABOUTME: Environment-backed values are exercised with temp-env.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use drydock::config::{BackendConfig, CONFIG_FILENAME_DIR, Config, EnvValue};
use drydock::domain::BackendKind;
use drydock::error::Error;

const COMPOSE_CONFIG: &str = r#"
database_url:
  env: DRYDOCK_TEST_DATABASE_URL
poll_interval: 10s
heartbeat_interval: 20s
lease:
  timeout: 5m
  sweep_on_idle: false
staging:
  dir: /var/lib/drydock/staging
  secure_wipe: false
backend:
  kind: compose
  project: shop
  command: [podman-compose]
  pull_timeout: 2m
  up_timeout: 90s
maintenance:
  flag_path: /run/drydock/maintenance
  reload_command: [nginx, -s, reload]
  reload_timeout: 5s
notify:
  hook: /etc/drydock/notify.sh
  hook_timeout: 15s
store:
  max_connections: 2
  connect_timeout: 3s
"#;

#[test]
fn full_compose_config_parses() {
    let config = Config::from_yaml(COMPOSE_CONFIG).unwrap();

    assert_eq!(config.poll_interval, Duration::from_secs(10));
    assert_eq!(config.heartbeat_interval, Duration::from_secs(20));
    assert_eq!(config.lease.timeout, Duration::from_secs(300));
    assert!(!config.lease.sweep_on_idle);
    assert_eq!(config.staging.dir, PathBuf::from("/var/lib/drydock/staging"));
    assert!(!config.staging.secure_wipe);
    assert_eq!(config.backend.kind(), BackendKind::Compose);
    assert_eq!(config.backend.timeout(), Duration::from_secs(90));

    let BackendConfig::Compose(compose) = &config.backend else {
        panic!("expected compose backend");
    };
    assert_eq!(compose.project.as_str(), "shop");
    assert_eq!(compose.command.head, "podman-compose");
    assert!(compose.command.tail.is_empty());

    let reload = config.maintenance.reload_command.as_ref().unwrap();
    assert_eq!(reload.head, "nginx");
    assert_eq!(reload.tail, vec!["-s".to_string(), "reload".to_string()]);
    assert_eq!(config.notify.hook, Some(PathBuf::from("/etc/drydock/notify.sh")));
    assert_eq!(config.notify.hook_timeout, Duration::from_secs(15));
    assert_eq!(config.store.max_connections, 2);
}

#[test]
fn database_url_resolves_from_environment() {
    let config = Config::from_yaml(COMPOSE_CONFIG).unwrap();

    temp_env::with_var(
        "DRYDOCK_TEST_DATABASE_URL",
        Some("postgres://agent@db/drydock"),
        || {
            assert_eq!(
                config.database_url.resolve().unwrap(),
                "postgres://agent@db/drydock"
            );
        },
    );
    temp_env::with_var_unset("DRYDOCK_TEST_DATABASE_URL", || {
        assert!(matches!(
            config.database_url.resolve(),
            Err(Error::MissingEnvVar(_))
        ));
    });
}

#[test]
fn debug_output_never_shows_literal_database_url() {
    let config = Config::from_yaml(
        "database_url: postgres://agent:hunter2@db/drydock\nbackend:\n  kind: helm\n  release: web\n",
    )
    .unwrap();

    assert!(matches!(config.database_url, EnvValue::Literal(_)));
    assert!(!format!("{config:?}").contains("hunter2"));
}

#[test]
fn config_in_dot_directory_is_discovered() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(CONFIG_FILENAME_DIR);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, COMPOSE_CONFIG).unwrap();

    assert_eq!(Config::find(dir.path()).unwrap(), path);
    assert_eq!(
        Config::discover(dir.path()).unwrap().backend.kind(),
        BackendKind::Compose
    );
}

#[test]
fn zero_lease_timeout_is_rejected() {
    let yaml = COMPOSE_CONFIG.replace("timeout: 5m", "timeout: 0s");
    assert!(matches!(
        Config::from_yaml(&yaml),
        Err(Error::InvalidConfig(msg)) if msg.contains("lease.timeout")
    ));
}

#[test]
fn zero_store_connections_are_rejected() {
    let yaml = COMPOSE_CONFIG.replace("max_connections: 2", "max_connections: 0");
    assert!(matches!(
        Config::from_yaml(&yaml),
        Err(Error::InvalidConfig(msg)) if msg.contains("max_connections")
    ));
}

#[test]
fn missing_backend_is_a_parse_error() {
    let result = Config::from_yaml("database_url: postgres://localhost/drydock\n");
    assert!(matches!(result, Err(Error::Yaml(_))));
}

#[test]
fn blank_compose_program_is_rejected() {
    let yaml = COMPOSE_CONFIG.replace("command: [podman-compose]", "command: [\"  \", up]");
    assert!(matches!(Config::from_yaml(&yaml), Err(Error::Yaml(_))));
}
