use crate::model::{ProjectConfig, WorkspaceConfig};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Per-project config filename.
pub const PROJECT_CONFIG_FILE: &str = "sluice.toml";

/// Workspace-level config filename, looked up at the workspace root.
pub const WORKSPACE_CONFIG_FILE: &str = "sluice_config.toml";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("scanning {path}: {source}")]
    Scan {
        path: String,
        source: std::io::Error,
    },
    #[error("duplicate DAG name {0:?}")]
    DuplicateDag(String),
}

/// Parses a single `sluice.toml` file.
pub fn load(path: impl AsRef<Path>) -> Result<ProjectConfig, LoadError> {
    let path = path.as_ref();
    let abs = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let display = abs.display().to_string();

    let raw = std::fs::read_to_string(&abs).map_err(|source| LoadError::Read {
        path: display.clone(),
        source,
    })?;
    let mut cfg: ProjectConfig = toml::from_str(&raw).map_err(|source| LoadError::Parse {
        path: display,
        source,
    })?;
    cfg.path = abs;
    Ok(cfg)
}

/// Finds every `projects/*/sluice.toml` under `root` and returns the configs
/// keyed by DAG name. A project without `dag.name` takes its directory name.
pub fn discover(root: impl AsRef<Path>) -> Result<BTreeMap<String, ProjectConfig>, LoadError> {
    let projects_dir = root.as_ref().join("projects");
    let mut configs = BTreeMap::new();

    let entries = match std::fs::read_dir(&projects_dir) {
        Ok(entries) => entries,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(configs),
        Err(source) => {
            return Err(LoadError::Scan {
                path: projects_dir.display().to_string(),
                source,
            });
        }
    };

    let mut project_dirs: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    project_dirs.sort();

    for dir in project_dirs {
        let config_path = dir.join(PROJECT_CONFIG_FILE);
        if !config_path.is_file() {
            continue;
        }

        let mut cfg = load(&config_path)?;
        if cfg.dag.name.is_empty() {
            cfg.dag.name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        if configs.contains_key(&cfg.dag.name) {
            return Err(LoadError::DuplicateDag(cfg.dag.name));
        }
        configs.insert(cfg.dag.name.clone(), cfg);
    }

    Ok(configs)
}

/// Loads `sluice_config.toml` from the workspace root. Returns `None` when
/// the file does not exist (workspace config is optional).
pub fn load_workspace(root: impl AsRef<Path>) -> Result<Option<WorkspaceConfig>, LoadError> {
    let path = root.as_ref().join(WORKSPACE_CONFIG_FILE);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(LoadError::Read {
                path: path.display().to_string(),
                source,
            });
        }
    };

    let mut cfg: WorkspaceConfig = toml::from_str(&raw).map_err(|source| LoadError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    // Relative paths are anchored at the workspace root.
    if let Some(secrets_dir) = cfg.secrets_dir.take() {
        cfg.secrets_dir = Some(if secrets_dir.is_absolute() {
            secrets_dir
        } else {
            root.as_ref().join(secrets_dir)
        });
    }

    Ok(Some(cfg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_project(root: &Path, dir_name: &str, contents: &str) {
        let dir = root.join("projects").join(dir_name);
        fs::create_dir_all(&dir).expect("create project dir");
        fs::write(dir.join(PROJECT_CONFIG_FILE), contents).expect("write config");
    }

    #[test]
    fn load_parses_tasks_and_remembers_path() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_project(
            tmp.path(),
            "claims",
            r#"
[dag]
name = "claims_pipeline"
schedule = "0 2 * * *"

[[tasks]]
name = "extract"
script = "extract.py"

[[tasks]]
name = "load"
script = "load.sql"
depends_on = ["extract"]
retries = 2
retry_delay = "30s"
timeout = "5m"
"#,
        );

        let path = tmp.path().join("projects/claims").join(PROJECT_CONFIG_FILE);
        let cfg = load(&path).expect("load");
        assert_eq!(cfg.dag.name, "claims_pipeline");
        assert_eq!(cfg.tasks.len(), 2);
        assert_eq!(cfg.tasks[1].retries, 2);
        assert_eq!(
            cfg.tasks[1].retry_delay.expect("retry delay").as_std(),
            std::time::Duration::from_secs(30)
        );
        assert!(cfg.dir().ends_with("projects/claims"));
    }

    #[test]
    fn discover_keys_by_dag_name_with_directory_fallback() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_project(tmp.path(), "named", "[dag]\nname = \"explicit\"\n");
        write_project(tmp.path(), "anonymous", "[dag]\n");

        let configs = discover(tmp.path()).expect("discover");
        assert_eq!(configs.len(), 2);
        assert!(configs.contains_key("explicit"));
        assert!(configs.contains_key("anonymous"));
    }

    #[test]
    fn discover_rejects_duplicate_dag_names() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_project(tmp.path(), "one", "[dag]\nname = \"same\"\n");
        write_project(tmp.path(), "two", "[dag]\nname = \"same\"\n");

        let err = discover(tmp.path()).expect_err("duplicate");
        assert!(matches!(err, LoadError::DuplicateDag(name) if name == "same"));
    }

    #[test]
    fn discover_on_empty_root_finds_nothing() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let configs = discover(tmp.path()).expect("discover");
        assert!(configs.is_empty());
    }

    #[test]
    fn workspace_config_is_optional_and_anchors_secrets_dir() {
        let tmp = tempfile::tempdir().expect("tempdir");
        assert!(load_workspace(tmp.path()).expect("load").is_none());

        fs::write(
            tmp.path().join(WORKSPACE_CONFIG_FILE),
            "secrets_dir = \"vault\"\nkeep_artifacts = [\"logs\"]\n",
        )
        .expect("write workspace config");

        let cfg = load_workspace(tmp.path())
            .expect("load")
            .expect("config present");
        assert_eq!(cfg.secrets_dir.expect("secrets dir"), tmp.path().join("vault"));
        assert_eq!(cfg.keep_artifacts, Some(vec!["logs".to_string()]));
    }
}
