// ABOUTME: Locates the deployable root inside an extracted bundle.
// ABOUTME: Helm bundles yield a chart directory, Compose bundles a compose file.

use std::fs;
use std::path::{Path, PathBuf};

use super::error::StageError;

pub const CHART_DIR: &str = "chart";
pub const CHART_FILE: &str = "Chart.yaml";
pub const COMPOSE_FILES: [&str; 4] = [
    "docker-compose.yaml",
    "docker-compose.yml",
    "compose.yaml",
    "compose.yml",
];

/// Step through single-directory wrappers such as `myapp-1.2.0/`.
pub fn unwrap_single_dir(root: &Path) -> PathBuf {
    let mut current = root.to_path_buf();
    loop {
        let Ok(entries) = fs::read_dir(&current) else {
            return current;
        };
        let entries: Vec<_> = entries.filter_map(Result::ok).collect();
        match entries.as_slice() {
            [only] if only.file_type().map(|t| t.is_dir()).unwrap_or(false) => {
                current = only.path();
            }
            _ => return current,
        }
    }
}

/// Chart directory: `chart/`, else the root when it holds `Chart.yaml`, else
/// the first subdirectory (by name) that holds one.
pub fn find_chart_root(root: &Path) -> Result<PathBuf, StageError> {
    let root = unwrap_single_dir(root);

    let chart_dir = root.join(CHART_DIR);
    if chart_dir.join(CHART_FILE).is_file() {
        return Ok(chart_dir);
    }
    if root.join(CHART_FILE).is_file() {
        return Ok(root);
    }

    let mut candidates: Vec<PathBuf> = fs::read_dir(&root)
        .map_err(|source| StageError::Extract { source })?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir() && p.join(CHART_FILE).is_file())
        .collect();
    candidates.sort();

    candidates
        .into_iter()
        .next()
        .ok_or(StageError::Layout {
            expected: "a Helm chart (Chart.yaml)",
        })
}

/// First compose definition found at the root, in [`COMPOSE_FILES`] order.
pub fn find_compose_file(root: &Path) -> Result<PathBuf, StageError> {
    let root = unwrap_single_dir(root);

    COMPOSE_FILES
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file())
        .ok_or(StageError::Layout {
            expected: "a compose file (docker-compose.yaml)",
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "name: x\n").unwrap();
    }

    #[test]
    fn prefers_chart_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("chart/Chart.yaml"));
        touch(&dir.path().join("Chart.yaml"));

        assert_eq!(find_chart_root(dir.path()).unwrap(), dir.path().join("chart"));
    }

    #[test]
    fn finds_named_chart_directory() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("myapp/Chart.yaml"));
        touch(&dir.path().join("README.md"));

        assert_eq!(find_chart_root(dir.path()).unwrap(), dir.path().join("myapp"));
    }

    #[test]
    fn steps_through_wrapper_directory() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("release-1.0/docker-compose.yml"));

        assert_eq!(
            find_compose_file(dir.path()).unwrap(),
            dir.path().join("release-1.0/docker-compose.yml")
        );
    }

    #[test]
    fn missing_chart_is_a_layout_error() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("docker-compose.yaml"));

        assert!(matches!(
            find_chart_root(dir.path()),
            Err(StageError::Layout { .. })
        ));
    }
}
