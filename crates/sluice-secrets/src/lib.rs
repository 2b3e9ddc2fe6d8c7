//! Secrets for sluice projects, parsed from a TOML file.
//!
//! The file format supports both plain and structured secrets:
//!
//! ```toml
//! [global]
//! smtp_password = "plain_value"
//!
//! [global.warehouse_db]
//! host = "server.example.com"
//! port = "1433"
//! user = "admin"
//! password = "secret"
//!
//! [claims_pipeline]
//! api_key = "abc123"
//! ```
//!
//! Resolution checks the project-scoped section first, then falls back to
//! `[global]`.

use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("reading secrets file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("parsing secrets file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("secrets file {path}: field {scope}.{secret}.{field} must be a string")]
    NonStringField {
        path: String,
        scope: String,
        secret: String,
        field: String,
    },
    #[error("secrets file {path}: section {scope:?} is not a table")]
    NotATable { path: String, scope: String },
    #[error("secrets file {path}: key {scope}.{key} must be a string or table")]
    InvalidEntry {
        path: String,
        scope: String,
        key: String,
    },
    #[error("secret {key:?} not found for project {project:?}")]
    NotFound { project: String, key: String },
    #[error("field {field:?} not found in secret {secret:?} for project {project:?}")]
    FieldNotFound {
        project: String,
        secret: String,
        field: String,
    },
    #[error("secret {secret:?} is a plain value, not a structured secret")]
    PlainValue { secret: String },
    #[error("encoding structured secret {secret:?}: {source}")]
    Encode {
        secret: String,
        source: serde_json::Error,
    },
}

/// A secret is either a plain string value or a set of named string fields.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Secret {
    Plain(String),
    Structured(BTreeMap<String, String>),
}

/// Secrets organised by scope. Lookups never mutate; the store is shared
/// across the RPC server, triggers and runners behind an `Arc`.
#[derive(Debug, Default)]
pub struct SecretStore {
    data: BTreeMap<String, BTreeMap<String, Secret>>,
}

impl SecretStore {
    /// Parses a TOML secrets file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SecretError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let raw = std::fs::read_to_string(path).map_err(|source| SecretError::Read {
            path: display.clone(),
            source,
        })?;
        Self::parse(&raw, &display)
    }

    /// Parses secrets from an in-memory TOML string. `origin` is used in
    /// error messages in place of a file path.
    pub fn parse(raw: &str, origin: &str) -> Result<Self, SecretError> {
        let path = origin;
        let table: toml::Table = toml::from_str(raw).map_err(|source| SecretError::Parse {
            path: path.to_string(),
            source,
        })?;

        let mut data = BTreeMap::new();
        for (scope, section) in table {
            let toml::Value::Table(section) = section else {
                return Err(SecretError::NotATable {
                    path: path.to_string(),
                    scope,
                });
            };

            let mut secrets = BTreeMap::new();
            for (key, value) in section {
                match value {
                    toml::Value::String(s) => {
                        secrets.insert(key, Secret::Plain(s));
                    }
                    toml::Value::Table(fields) => {
                        let mut parsed = BTreeMap::new();
                        for (field, field_value) in fields {
                            let toml::Value::String(s) = field_value else {
                                return Err(SecretError::NonStringField {
                                    path: path.to_string(),
                                    scope,
                                    secret: key,
                                    field,
                                });
                            };
                            parsed.insert(field, s);
                        }
                        secrets.insert(key, Secret::Structured(parsed));
                    }
                    _ => {
                        return Err(SecretError::InvalidEntry {
                            path: path.to_string(),
                            scope,
                            key,
                        });
                    }
                }
            }
            data.insert(scope, secrets);
        }

        Ok(Self { data })
    }

    /// Looks up a secret by key, checking the project scope first and then
    /// `[global]`. Structured secrets resolve to a JSON object of their
    /// fields.
    pub fn resolve(&self, project: &str, key: &str) -> Result<String, SecretError> {
        match self.lookup(project, key) {
            Some(Secret::Plain(value)) => Ok(value.clone()),
            Some(Secret::Structured(fields)) => {
                serde_json::to_string(fields).map_err(|source| SecretError::Encode {
                    secret: key.to_string(),
                    source,
                })
            }
            None => Err(SecretError::NotFound {
                project: project.to_string(),
                key: key.to_string(),
            }),
        }
    }

    /// Looks up a single field within a structured secret.
    pub fn resolve_field(
        &self,
        project: &str,
        secret: &str,
        field: &str,
    ) -> Result<String, SecretError> {
        match self.lookup(project, secret) {
            Some(Secret::Structured(fields)) => {
                fields
                    .get(field)
                    .cloned()
                    .ok_or_else(|| SecretError::FieldNotFound {
                        project: project.to_string(),
                        secret: secret.to_string(),
                        field: field.to_string(),
                    })
            }
            Some(Secret::Plain(_)) => Err(SecretError::PlainValue {
                secret: secret.to_string(),
            }),
            None => Err(SecretError::NotFound {
                project: project.to_string(),
                key: secret.to_string(),
            }),
        }
    }

    fn lookup(&self, project: &str, key: &str) -> Option<&Secret> {
        if let Some(section) = self.data.get(project)
            && let Some(secret) = section.get(key)
        {
            return Some(secret);
        }
        self.data.get("global").and_then(|s| s.get(key))
    }
}
