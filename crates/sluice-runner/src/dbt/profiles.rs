use sluice_config::DEFAULT_DBT_DRIVER;
use sluice_secrets::{SecretError, SecretStore};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfilesError {
    #[error("dbt connection secret name is required (set connection in [dag.dbt])")]
    MissingConnection,
    #[error("resolving {secret}.{field}: {source}")]
    Resolve {
        secret: String,
        field: String,
        source: SecretError,
    },
    #[error("{secret}.port {value:?} is not a valid integer")]
    InvalidPort { secret: String, value: String },
    #[error("creating profiles directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Inputs for profile generation.
#[derive(Debug, Clone, Default)]
pub struct DbtProfilesInput {
    pub dag_name: String,
    /// Profile name; defaults to the DAG name.
    pub profile: Option<String>,
    /// Target name; defaults to "prod".
    pub target: Option<String>,
    /// ODBC driver string; defaults to [`DEFAULT_DBT_DRIVER`].
    pub driver: Option<String>,
    pub threads: Option<String>,
    /// Structured secret holding host/port/database/schema/user/password.
    pub connection: Option<String>,
}

/// A generated profiles directory. The directory (and the credentials inside
/// it) are removed when this value drops.
#[derive(Debug)]
pub struct ProfilesDir {
    dir: tempfile::TempDir,
}

impl ProfilesDir {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Materialises a `profiles.yml` for dbt from a structured secret.
///
/// The secret named by `input.connection` must carry `host`, `port`,
/// `database`, `schema`, `user` and `password` fields; `port` must parse as
/// an integer.
pub fn generate_profiles(
    input: &DbtProfilesInput,
    store: &SecretStore,
) -> Result<ProfilesDir, ProfilesError> {
    let secret = input
        .connection
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or(ProfilesError::MissingConnection)?;

    let resolve = |field: &str| {
        store
            .resolve_field(&input.dag_name, secret, field)
            .map_err(|source| ProfilesError::Resolve {
                secret: secret.to_string(),
                field: field.to_string(),
                source,
            })
    };

    let host = resolve("host")?;
    let port_raw = resolve("port")?;
    let port: u32 = port_raw.parse().map_err(|_| ProfilesError::InvalidPort {
        secret: secret.to_string(),
        value: port_raw,
    })?;
    let database = resolve("database")?;
    let schema = resolve("schema")?;
    let user = resolve("user")?;
    let password = resolve("password")?;

    let profile = input
        .profile
        .as_deref()
        .filter(|p| !p.is_empty())
        .unwrap_or(&input.dag_name);
    let target = input.target.as_deref().filter(|t| !t.is_empty()).unwrap_or("prod");
    let driver = input
        .driver
        .as_deref()
        .filter(|d| !d.is_empty())
        .unwrap_or(DEFAULT_DBT_DRIVER);
    let threads = input.threads.as_deref().filter(|t| !t.is_empty()).unwrap_or("4");

    let contents = format!(
        "{profile}:\n  target: {target}\n  outputs:\n    {target}:\n      type: sqlserver\n      driver: \"{driver}\"\n      server: \"{host}\"\n      threads: {threads}\n      port: {port}\n      database: \"{database}\"\n      schema: \"{schema}\"\n      user: \"{user}\"\n      password: \"{password}\"\n      encrypt: true\n      trust_cert: true\n"
    );

    let dir = tempfile::Builder::new().prefix("sluice-dbt-profiles-").tempdir()?;
    std::fs::write(dir.path().join("profiles.yml"), contents)?;
    Ok(ProfilesDir { dir })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRETS: &str = r#"
[claims.warehouse]
host = "db.example.com"
port = "1433"
database = "analytics"
schema = "dbo"
user = "dbt_user"
password = "pw"

[claims.bad_port]
host = "db.example.com"
port = "fourteen"
database = "analytics"
schema = "dbo"
user = "dbt_user"
password = "pw"
"#;

    fn store() -> SecretStore {
        SecretStore::parse(SECRETS, "secrets.toml").expect("parse secrets")
    }

    fn input(connection: &str) -> DbtProfilesInput {
        DbtProfilesInput {
            dag_name: "claims".to_string(),
            connection: Some(connection.to_string()),
            ..DbtProfilesInput::default()
        }
    }

    #[test]
    fn writes_a_sqlserver_profile_with_defaults() {
        let profiles = generate_profiles(&input("warehouse"), &store()).expect("generate");
        let contents =
            std::fs::read_to_string(profiles.path().join("profiles.yml")).expect("read yaml");

        assert!(contents.starts_with("claims:\n  target: prod\n"));
        assert!(contents.contains("type: sqlserver"));
        assert!(contents.contains("server: \"db.example.com\""));
        assert!(contents.contains("port: 1433"));
        assert!(contents.contains(&format!("driver: \"{DEFAULT_DBT_DRIVER}\"")));
        assert!(contents.contains("threads: 4"));
        assert!(contents.contains("trust_cert: true"));
    }

    #[test]
    fn explicit_profile_target_and_threads_override_defaults() {
        let mut inp = input("warehouse");
        inp.profile = Some("custom".to_string());
        inp.target = Some("dev".to_string());
        inp.threads = Some("8".to_string());

        let profiles = generate_profiles(&inp, &store()).expect("generate");
        let contents =
            std::fs::read_to_string(profiles.path().join("profiles.yml")).expect("read yaml");
        assert!(contents.starts_with("custom:\n  target: dev\n"));
        assert!(contents.contains("threads: 8"));
    }

    #[test]
    fn missing_connection_name_is_rejected() {
        let err = generate_profiles(&DbtProfilesInput::default(), &store())
            .expect_err("no connection");
        assert!(matches!(err, ProfilesError::MissingConnection));
    }

    #[test]
    fn non_integer_port_is_rejected() {
        let err = generate_profiles(&input("bad_port"), &store()).expect_err("bad port");
        assert!(matches!(err, ProfilesError::InvalidPort { .. }));
    }

    #[test]
    fn missing_field_names_the_secret_and_field() {
        let err = generate_profiles(&input("nonexistent"), &store()).expect_err("missing secret");
        let message = err.to_string();
        assert!(message.contains("nonexistent.host"), "message: {message}");
    }

    #[test]
    fn directory_is_removed_on_drop() {
        let profiles = generate_profiles(&input("warehouse"), &store()).expect("generate");
        let path = profiles.path().to_path_buf();
        assert!(path.join("profiles.yml").exists());
        drop(profiles);
        assert!(!path.exists());
    }
}
