use sluice_core::RunDirs;
use std::path::Path;
use thiserror::Error;

/// Directories never copied into a snapshot.
const SKIP_DIRS: [&str; 4] = [".git", "__pycache__", ".venv", "node_modules"];

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

fn io_err(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> SnapshotError {
    let context = context.into();
    move |source| SnapshotError::Io { context, source }
}

/// Copies the project tree into the run's snapshot directory and creates the
/// log and data directories.
///
/// Snapshotting frees the source tree for concurrent edits during a long run
/// and guarantees every task observes the same code. Virtualenvs, VCS
/// metadata and package caches are pruned at any depth; symlinks are skipped
/// entirely since they may escape the tree.
pub fn snapshot(
    project_dir: &Path,
    runs_root: &Path,
    run_id: &str,
) -> Result<RunDirs, SnapshotError> {
    std::fs::create_dir_all(runs_root)
        .map_err(io_err(format!("creating runs dir {}", runs_root.display())))?;
    let abs_runs_root = runs_root
        .canonicalize()
        .map_err(io_err(format!("resolving runs dir {}", runs_root.display())))?;

    let run_dir = abs_runs_root.join(run_id);
    let dirs = RunDirs {
        snapshot: run_dir.join("project"),
        logs: run_dir.join("logs"),
        data: run_dir.join("data"),
    };

    std::fs::create_dir_all(&dirs.logs).map_err(io_err("creating log dir"))?;
    std::fs::create_dir_all(&dirs.data).map_err(io_err("creating data dir"))?;

    copy_tree(project_dir, &dirs.snapshot, true)
        .map_err(io_err("copying project to snapshot"))?;

    Ok(dirs)
}

/// Copies the contents of a seed directory (files pre-fetched by a trigger)
/// into the run's data directory before any task runs.
pub fn seed_data_dir(seed_dir: &Path, data_dir: &Path) -> Result<(), SnapshotError> {
    copy_tree(seed_dir, data_dir, false).map_err(io_err("seeding data dir"))
}

fn copy_tree(src: &Path, dst: &Path, prune: bool) -> std::io::Result<()> {
    let src_meta = std::fs::metadata(src)?;
    std::fs::create_dir_all(dst)?;
    std::fs::set_permissions(dst, src_meta.permissions())?;

    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            continue;
        }

        let target = dst.join(&name);
        if file_type.is_dir() {
            if prune && SKIP_DIRS.contains(&name.to_string_lossy().as_ref()) {
                continue;
            }
            copy_tree(&entry.path(), &target, prune)?;
        } else {
            // fs::copy carries permission bits along with the contents.
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

/// Removes run subdirectories not named in `keep`. An empty keep set means
/// keep everything.
pub fn cleanup_artifacts(run_dir: &Path, keep: &[String]) -> Result<(), SnapshotError> {
    if keep.is_empty() {
        return Ok(());
    }

    for artifact in ["project", "logs", "data"] {
        if keep.iter().any(|k| k == artifact) {
            continue;
        }
        let path = run_dir.join(artifact);
        if path.exists() {
            std::fs::remove_dir_all(&path)
                .map_err(io_err(format!("removing {}", path.display())))?;
        }
    }
    Ok(())
}
