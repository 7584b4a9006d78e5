// ABOUTME: Config scaffolding for new agent hosts.
// ABOUTME: Writes a commented drydock.yml template for the chosen backend.

use std::path::{Path, PathBuf};

use crate::domain::BackendKind;
use crate::error::{Error, Result};

use super::CONFIG_FILENAME;

/// Write a template config into `dir`, returning its path.
pub fn init_config(dir: &Path, backend: BackendKind, force: bool) -> Result<PathBuf> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    std::fs::write(&config_path, generate_template_yaml(backend))?;

    Ok(config_path)
}

fn generate_template_yaml(backend: BackendKind) -> String {
    let backend_section = match backend {
        BackendKind::Helm => {
            r#"backend:
  kind: helm
  release: my-app
  namespace: default
  # Passed to helm --timeout; the process is killed one minute later
  timeout: 10m"#
        }
        BackendKind::Compose => {
            r#"backend:
  kind: compose
  project: my-app
  # command: [docker, compose]
  pull_timeout: 10m
  up_timeout: 5m"#
        }
    };

    format!(
        r#"# Connection string for the task store
database_url:
  env: DATABASE_URL

poll_interval: 30s
# Must stay well below lease.timeout
heartbeat_interval: 60s

lease:
  timeout: 30m
  # Fail expired leases of crashed agents while idle
  sweep_on_idle: true

staging:
  # dir: /var/lib/drydock/staging
  secure_wipe: true

{backend_section}

maintenance:
  enabled: true
  flag_path: /tmp/maintenance-mode
  # reload_command: [nginx, -s, reload]

# notify:
#   hook: /etc/drydock/notify.sh
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn templates_parse_for_both_backends() {
        for kind in [BackendKind::Helm, BackendKind::Compose] {
            temp_env::with_var("DATABASE_URL", Some("postgres://localhost/drydock"), || {
                let config = Config::from_yaml(&generate_template_yaml(kind)).unwrap();
                assert_eq!(config.backend.kind(), kind);
                assert_eq!(config.database_url.resolve().unwrap(), "postgres://localhost/drydock");
            });
        }
    }

    #[test]
    fn refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        init_config(dir.path(), BackendKind::Helm, false).unwrap();

        let err = init_config(dir.path(), BackendKind::Compose, false).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));

        let path = init_config(dir.path(), BackendKind::Compose, true).unwrap();
        assert!(std::fs::read_to_string(path).unwrap().contains("kind: compose"));
    }
}
