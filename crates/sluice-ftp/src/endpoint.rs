use crate::client::FtpError;
use sluice_config::FtpWatchConfig;
use sluice_secrets::SecretStore;

/// Everything needed to open one FTP connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub tls: bool,
}

/// Resolves connection credentials for a watch config.
///
/// When `secret` names a structured secret, host, user and password come from
/// its fields (optional `port` and `tls` fields override the config).
/// Otherwise the legacy path applies: host and user from the config plus a
/// separately resolved plain password secret.
pub fn resolve_endpoint(
    store: &SecretStore,
    project: &str,
    cfg: &FtpWatchConfig,
) -> Result<FtpEndpoint, FtpError> {
    if let Some(secret) = cfg.secret.as_deref() {
        return endpoint_from_secret_with(store, project, secret, cfg.port(), cfg.tls);
    }

    let password = store.resolve(project, &cfg.password_secret)?;
    Ok(FtpEndpoint {
        host: cfg.host.clone(),
        port: cfg.port(),
        user: cfg.user.clone(),
        password,
        tls: cfg.tls,
    })
}

/// Resolves an endpoint purely from a structured secret with `host`, `user`
/// and `password` fields. Optional fields: `port` (default 21), `tls`
/// (`"true"` enables explicit TLS).
pub fn endpoint_from_secret(
    store: &SecretStore,
    project: &str,
    secret: &str,
) -> Result<FtpEndpoint, FtpError> {
    endpoint_from_secret_with(store, project, secret, 21, false)
}

fn endpoint_from_secret_with(
    store: &SecretStore,
    project: &str,
    secret: &str,
    default_port: u16,
    default_tls: bool,
) -> Result<FtpEndpoint, FtpError> {
    let host = store.resolve_field(project, secret, "host")?;
    let user = store.resolve_field(project, secret, "user")?;
    let password = store.resolve_field(project, secret, "password")?;

    let port = store
        .resolve_field(project, secret, "port")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(default_port);
    let tls = store
        .resolve_field(project, secret, "tls")
        .map(|t| t == "true")
        .unwrap_or(default_tls);

    Ok(FtpEndpoint {
        host,
        port,
        user,
        password,
        tls,
    })
}
