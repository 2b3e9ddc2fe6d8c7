use crate::custom::CustomRunner;
use crate::errors::ResolveError;
use crate::python::PythonRunner;
use crate::shell::ShellRunner;
use crate::sql::SqlRunner;
use crate::Runner;
use std::path::Path;
use std::sync::Arc;

/// Maps a task's runner label (or script extension) to an execution strategy.
///
/// Stateless strategies are singletons: resolving the same label twice
/// returns the same `Arc`. Built once at startup and passed by reference;
/// nothing here mutates after construction.
pub struct RunnerRegistry {
    python: Arc<PythonRunner>,
    bash: Arc<ShellRunner>,
    sql: Arc<SqlRunner>,
}

impl Default for RunnerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self {
            python: Arc::new(PythonRunner),
            bash: Arc::new(ShellRunner),
            sql: Arc::new(SqlRunner),
        }
    }

    /// Resolution policy:
    ///
    /// 1. A label starting with `"$ "` is a custom command prefix.
    /// 2. `python` / `bash` / `sql` select the built-in singletons. `dbt` is
    ///    rejected here; the executor constructs it from `[dag.dbt]`.
    /// 3. Any other non-empty label fails.
    /// 4. With no label, the script extension decides: `.py`, `.sh`, `.sql`.
    ///    Unknown extensions fail rather than guessing.
    pub fn resolve(
        &self,
        explicit: Option<&str>,
        script_path: &Path,
    ) -> Result<Arc<dyn Runner>, ResolveError> {
        if let Some(label) = explicit.filter(|l| !l.is_empty()) {
            if let Some(command) = label.strip_prefix("$ ") {
                if command.trim().is_empty() {
                    return Err(ResolveError::EmptyCustomCommand);
                }
                return Ok(Arc::new(CustomRunner {
                    command: command.to_string(),
                }));
            }
            return match label {
                "python" => Ok(self.python.clone()),
                "bash" => Ok(self.bash.clone()),
                "sql" => Ok(self.sql.clone()),
                "dbt" => Err(ResolveError::DbtByLabel),
                other => Err(ResolveError::UnknownRunner(other.to_string())),
            };
        }

        let extension = script_path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        match extension.as_str() {
            ".py" => Ok(self.python.clone()),
            ".sh" => Ok(self.bash.clone()),
            ".sql" => Ok(self.sql.clone()),
            _ => Err(ResolveError::UnknownExtension(extension)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RunnerRegistry {
        RunnerRegistry::new()
    }

    #[test]
    fn labels_select_built_in_strategies() {
        let r = registry();
        assert!(r.resolve(Some("python"), Path::new("x")).is_ok());
        assert!(r.resolve(Some("bash"), Path::new("x")).is_ok());
        assert!(r.resolve(Some("sql"), Path::new("x")).is_ok());
    }

    #[test]
    fn extensions_select_strategies_when_no_label_is_set() {
        let r = registry();
        assert!(r.resolve(None, Path::new("etl/extract.py")).is_ok());
        assert!(r.resolve(None, Path::new("run.sh")).is_ok());
        assert!(r.resolve(None, Path::new("load.sql")).is_ok());
    }

    #[test]
    fn stateless_strategies_are_singletons() {
        let r = registry();
        let first = r.resolve(Some("python"), Path::new("a.py")).expect("resolve");
        let second = r.resolve(None, Path::new("b.py")).expect("resolve");
        assert!(Arc::ptr_eq(&first, &second));

        let first = r.resolve(Some("sql"), Path::new("a.sql")).expect("resolve");
        let second = r.resolve(Some("sql"), Path::new("b.sql")).expect("resolve");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn dollar_prefix_builds_a_custom_runner() {
        let r = registry();
        let runner = r
            .resolve(Some("$ Rscript --vanilla"), Path::new("model.R"))
            .expect("resolve");
        // The custom strategy is per-resolution, not a singleton.
        let again = r
            .resolve(Some("$ Rscript --vanilla"), Path::new("model.R"))
            .expect("resolve");
        assert!(!Arc::ptr_eq(&runner, &again));
    }

    #[test]
    fn empty_custom_command_is_rejected() {
        let r = registry();
        assert_eq!(
            r.resolve(Some("$ "), Path::new("x")).expect_err("empty"),
            ResolveError::EmptyCustomCommand
        );
    }

    #[test]
    fn dbt_label_directs_to_config_path() {
        let r = registry();
        let err = r.resolve(Some("dbt"), Path::new("x")).expect_err("dbt");
        assert_eq!(err, ResolveError::DbtByLabel);
        assert!(err.to_string().contains("[dag.dbt]"));
    }

    #[test]
    fn unknown_label_fails_with_valid_values() {
        let r = registry();
        let err = r
            .resolve(Some("ruby"), Path::new("x.rb"))
            .expect_err("unknown label");
        assert_eq!(err, ResolveError::UnknownRunner("ruby".to_string()));
        assert!(err.to_string().contains("python, bash, sql"));
    }

    #[test]
    fn unknown_extension_fails_with_valid_values() {
        let r = registry();
        let err = r
            .resolve(None, Path::new("model.R"))
            .expect_err("unknown extension");
        assert_eq!(err, ResolveError::UnknownExtension(".R".to_string()));
        assert!(err.to_string().contains("set runner explicitly"));
    }

    #[test]
    fn missing_extension_fails() {
        let r = registry();
        assert_eq!(
            r.resolve(None, Path::new("Makefile")).expect_err("no ext"),
            ResolveError::UnknownExtension(String::new())
        );
    }
}
