use sluice_core::paths::is_within;
use sluice_db::{LoadMode, LoadParams, load_parquet};
use sluice_ftp::{Remote, endpoint_from_secret};
use sluice_rpc::{HandlerError, RpcServer, handler};
use sluice_secrets::SecretStore;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Registers the run-scoped RPC methods: the bulk-load primitive plus the
/// file-arrival handler family. Must happen before the server starts.
pub(crate) fn register_run_handlers(
    server: &mut RpcServer,
    store: Option<Arc<SecretStore>>,
    dag_name: &str,
    data_dir: &Path,
    remote: Arc<dyn Remote>,
) {
    register_load_data(server, store.clone(), dag_name, data_dir);
    if let Some(store) = store {
        register_ftp_handlers(server, store, dag_name, data_dir, remote);
    }
}

fn required<'a>(
    params: &'a HashMap<String, String>,
    key: &str,
) -> Result<&'a str, HandlerError> {
    params
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("missing required parameter: {key}").into())
}

/// Resolves `name` inside `base`, refusing traversal out of it.
fn resolve_within(base: &Path, name: &str) -> Result<PathBuf, HandlerError> {
    let candidate = base.join(name);
    if is_within(base, &candidate) {
        Ok(candidate)
    } else {
        Err(format!("file path {name:?} escapes data directory").into())
    }
}

fn register_load_data(
    server: &mut RpcServer,
    store: Option<Arc<SecretStore>>,
    dag_name: &str,
    data_dir: &Path,
) {
    let dag = dag_name.to_string();
    let data_dir = data_dir.to_path_buf();

    server.register(
        "load_data",
        handler(move |params: HashMap<String, String>| {
            let store = store.clone();
            let dag = dag.clone();
            let data_dir = data_dir.clone();
            async move {
                let file = required(&params, "file")?;
                let table = required(&params, "table")?;
                let connection = required(&params, "connection")?;
                let Some(store) = store else {
                    return Err("secrets store not configured (use --secrets flag)".into());
                };

                let schema = params
                    .get("schema")
                    .filter(|s| !s.is_empty())
                    .cloned()
                    .unwrap_or_else(|| "dbo".to_string());
                let mode = match params.get("mode").filter(|m| !m.is_empty()) {
                    Some(raw) => LoadMode::from_str(raw)?,
                    None => LoadMode::Append,
                };

                let file_path = resolve_within(&data_dir, file)?;
                let conn_str = store
                    .resolve(&dag, connection)
                    .map_err(|e| format!("resolving connection {connection:?}: {e}"))?;

                let rows = load_parquet(LoadParams {
                    file_path,
                    table: table.to_string(),
                    schema,
                    mode,
                    conn_str,
                })
                .await
                .map_err(|e| format!("loading data: {e}"))?;

                Ok(format!("{rows} rows loaded"))
            }
        }),
    );
}

fn register_ftp_handlers(
    server: &mut RpcServer,
    store: Arc<SecretStore>,
    dag_name: &str,
    data_dir: &Path,
    remote: Arc<dyn Remote>,
) {
    // ftp_list: params secret, directory, optional pattern. Returns a JSON
    // array of matching filenames.
    {
        let store = Arc::clone(&store);
        let remote = Arc::clone(&remote);
        let dag = dag_name.to_string();
        server.register(
            "ftp_list",
            handler(move |params: HashMap<String, String>| {
                let store = Arc::clone(&store);
                let remote = Arc::clone(&remote);
                let dag = dag.clone();
                async move {
                    let secret = required(&params, "secret")?.to_string();
                    let directory = required(&params, "directory")?.to_string();
                    let pattern = params
                        .get("pattern")
                        .filter(|p| !p.is_empty())
                        .cloned()
                        .unwrap_or_else(|| "*".to_string());

                    let endpoint = endpoint_from_secret(&store, &dag, &secret)?;
                    let names = tokio::task::spawn_blocking(move || {
                        let mut dir = remote.connect(&endpoint)?;
                        let files = dir.list(&directory, &pattern);
                        let _ = dir.close();
                        files
                    })
                    .await
                    .map_err(|e| format!("ftp task failed: {e}"))??
                    .into_iter()
                    .map(|f| f.name)
                    .collect::<Vec<_>>();

                    Ok(serde_json::to_string(&names).map_err(|e| e.to_string())?)
                }
            }),
        );
    }

    // ftp_download: single file (remote_path) or batch (directory+pattern)
    // into the run's data directory. Returns the downloaded filenames.
    {
        let store = Arc::clone(&store);
        let remote = Arc::clone(&remote);
        let dag = dag_name.to_string();
        let data_dir = data_dir.to_path_buf();
        server.register(
            "ftp_download",
            handler(move |params: HashMap<String, String>| {
                let store = Arc::clone(&store);
                let remote = Arc::clone(&remote);
                let dag = dag.clone();
                let data_dir = data_dir.clone();
                async move {
                    let secret = required(&params, "secret")?.to_string();
                    let endpoint = endpoint_from_secret(&store, &dag, &secret)?;

                    if let Some(pattern) = params.get("pattern").filter(|p| !p.is_empty()) {
                        let directory = params
                            .get("directory")
                            .filter(|d| !d.is_empty())
                            .ok_or("missing required parameter: directory (required with pattern)")?
                            .clone();
                        let pattern = pattern.clone();

                        let downloaded = tokio::task::spawn_blocking(move || {
                            let mut dir = remote.connect(&endpoint)?;
                            let result = {
                                let mut fetch = || -> Result<Vec<String>, sluice_ftp::FtpError> {
                                    let files = dir.list(&directory, &pattern)?;
                                    let mut downloaded = Vec::with_capacity(files.len());
                                    for file in files {
                                        let remote_path = format!("{directory}/{}", file.name);
                                        let local = data_dir.join(&file.name);
                                        dir.download(&remote_path, &local)?;
                                        downloaded.push(file.name);
                                    }
                                    Ok(downloaded)
                                };
                                fetch()
                            };
                            let _ = dir.close();
                            result
                        })
                        .await
                        .map_err(|e| format!("ftp task failed: {e}"))?
                        .map_err(|e: sluice_ftp::FtpError| e.to_string())?;

                        return Ok(serde_json::to_string(&downloaded)
                            .map_err(|e| e.to_string())?);
                    }

                    let remote_path = params
                        .get("remote_path")
                        .filter(|p| !p.is_empty())
                        .ok_or(
                            "missing required parameter: remote_path (or use directory+pattern for batch)",
                        )?
                        .clone();
                    let file_name = remote_path
                        .rsplit('/')
                        .next()
                        .unwrap_or(remote_path.as_str())
                        .to_string();
                    let local = resolve_within(&data_dir, &file_name)?;

                    let downloaded = tokio::task::spawn_blocking(move || {
                        let mut dir = remote.connect(&endpoint)?;
                        let result = dir.download(&remote_path, &local);
                        let _ = dir.close();
                        result.map(|_| file_name)
                    })
                    .await
                    .map_err(|e| format!("ftp task failed: {e}"))?
                    .map_err(|e| e.to_string())?;

                    Ok(serde_json::to_string(&vec![downloaded]).map_err(|e| e.to_string())?)
                }
            }),
        );
    }

    // ftp_upload: push a file from the data directory to the server.
    {
        let store = Arc::clone(&store);
        let remote = Arc::clone(&remote);
        let dag = dag_name.to_string();
        let data_dir = data_dir.to_path_buf();
        server.register(
            "ftp_upload",
            handler(move |params: HashMap<String, String>| {
                let store = Arc::clone(&store);
                let remote = Arc::clone(&remote);
                let dag = dag.clone();
                let data_dir = data_dir.clone();
                async move {
                    let secret = required(&params, "secret")?.to_string();
                    let local_name = required(&params, "local_name")?.to_string();
                    let remote_path = required(&params, "remote_path")?.to_string();

                    let local = resolve_within(&data_dir, &local_name)?;
                    let endpoint = endpoint_from_secret(&store, &dag, &secret)?;

                    tokio::task::spawn_blocking(move || {
                        let mut dir = remote.connect(&endpoint)?;
                        let result = dir.upload(&local, &remote_path);
                        let _ = dir.close();
                        result
                    })
                    .await
                    .map_err(|e| format!("ftp task failed: {e}"))?
                    .map_err(|e| e.to_string())?;

                    Ok(String::new())
                }
            }),
        );
    }

    // ftp_move: rename a file on the server.
    {
        let dag = dag_name.to_string();
        server.register(
            "ftp_move",
            handler(move |params: HashMap<String, String>| {
                let store = Arc::clone(&store);
                let remote = Arc::clone(&remote);
                let dag = dag.clone();
                async move {
                    let secret = required(&params, "secret")?.to_string();
                    let src = required(&params, "src")?.to_string();
                    let dst = required(&params, "dst")?.to_string();

                    let endpoint = endpoint_from_secret(&store, &dag, &secret)?;
                    tokio::task::spawn_blocking(move || {
                        let mut dir = remote.connect(&endpoint)?;
                        let result = dir.rename(&src, &dst);
                        let _ = dir.close();
                        result
                    })
                    .await
                    .map_err(|e| format!("ftp task failed: {e}"))?
                    .map_err(|e| e.to_string())?;

                    Ok(String::new())
                }
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_rejects_missing_and_empty_params() {
        let mut params = HashMap::new();
        params.insert("present".to_string(), "x".to_string());
        params.insert("empty".to_string(), String::new());

        assert_eq!(required(&params, "present").expect("present"), "x");
        assert_eq!(
            required(&params, "empty").expect_err("empty").to_string(),
            "missing required parameter: empty"
        );
        assert_eq!(
            required(&params, "absent").expect_err("absent").to_string(),
            "missing required parameter: absent"
        );
    }

    #[test]
    fn resolve_within_accepts_plain_names_and_rejects_escapes() {
        let base = Path::new("/runs/r1/data");
        assert_eq!(
            resolve_within(base, "sales.parquet").expect("plain"),
            PathBuf::from("/runs/r1/data/sales.parquet")
        );
        assert!(resolve_within(base, "sub/dir/file.parquet").is_ok());

        let err = resolve_within(base, "../logs/extract.log").expect_err("escape");
        assert!(err.to_string().contains("escapes data directory"));
        let err = resolve_within(base, "../../etc/passwd").expect_err("escape");
        assert!(err.to_string().contains("escapes data directory"));
    }
}
