use crate::endpoint::FtpEndpoint;
use crate::glob::NameMatcher;
use std::io::Write;
use std::path::Path;
use suppaftp::native_tls::TlsConnector;
use suppaftp::{NativeTlsConnector, NativeTlsFtpStream};
use thiserror::Error;

/// A remote file's metadata as reported by a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Error)]
pub enum FtpError {
    #[error("connecting to {addr}: {message}")]
    Connect { addr: String, message: String },
    #[error("login as {user:?}: {message}")]
    Login { user: String, message: String },
    #[error("listing {dir:?}: {message}")]
    List { dir: String, message: String },
    #[error("transferring {path:?}: {message}")]
    Transfer { path: String, message: String },
    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        source: globset::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("resolving credentials: {0}")]
    Credentials(#[from] sluice_secrets::SecretError),
}

/// An open connection to a remote directory tree.
///
/// Calls are blocking; async callers run a whole connect/operate/close
/// sequence inside `spawn_blocking`.
pub trait RemoteDir: Send {
    /// Lists plain files in `dir` whose names match the glob `pattern`.
    fn list(&mut self, dir: &str, pattern: &str) -> Result<Vec<RemoteFile>, FtpError>;
    /// Retrieves a remote file into `local_path`, creating parent dirs.
    fn download(&mut self, remote_path: &str, local_path: &Path) -> Result<(), FtpError>;
    /// Stores a local file at `remote_path`.
    fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<(), FtpError>;
    /// Renames (moves) a file on the server.
    fn rename(&mut self, from: &str, to: &str) -> Result<(), FtpError>;
    /// Creates `dir` and any missing parents.
    fn mkdir_all(&mut self, dir: &str) -> Result<(), FtpError>;
    /// Gracefully terminates the connection.
    fn close(&mut self) -> Result<(), FtpError>;
}

/// Connection factory. The trigger, dispatcher and RPC handlers depend on
/// this seam; production code plugs in [`FtpConnector`], tests a fake.
pub trait Remote: Send + Sync {
    fn connect(&self, endpoint: &FtpEndpoint) -> Result<Box<dyn RemoteDir>, FtpError>;
}

/// FTP-backed [`Remote`] implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct FtpConnector;

impl Remote for FtpConnector {
    fn connect(&self, endpoint: &FtpEndpoint) -> Result<Box<dyn RemoteDir>, FtpError> {
        let addr = format!("{}:{}", endpoint.host, endpoint.port);
        let mut stream =
            NativeTlsFtpStream::connect(&addr).map_err(|e| FtpError::Connect {
                addr: addr.clone(),
                message: e.to_string(),
            })?;

        if endpoint.tls {
            let connector = TlsConnector::new().map_err(|e| FtpError::Connect {
                addr: addr.clone(),
                message: e.to_string(),
            })?;
            stream = stream
                .into_secure(NativeTlsConnector::from(connector), &endpoint.host)
                .map_err(|e| FtpError::Connect {
                    addr: addr.clone(),
                    message: e.to_string(),
                })?;
        }

        if let Err(e) = stream.login(&endpoint.user, &endpoint.password) {
            let _ = stream.quit();
            return Err(FtpError::Login {
                user: endpoint.user.clone(),
                message: e.to_string(),
            });
        }

        Ok(Box::new(FtpDir { stream }))
    }
}

struct FtpDir {
    stream: NativeTlsFtpStream,
}

impl RemoteDir for FtpDir {
    fn list(&mut self, dir: &str, pattern: &str) -> Result<Vec<RemoteFile>, FtpError> {
        let matcher = NameMatcher::new(pattern).map_err(|source| FtpError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;

        let lines = self
            .stream
            .list(Some(dir))
            .map_err(|e| FtpError::List {
                dir: dir.to_string(),
                message: e.to_string(),
            })?;

        let mut files = Vec::new();
        for line in lines {
            // Lines that don't parse as LIST entries are skipped; servers
            // occasionally emit summary lines.
            let Ok(entry) = suppaftp::list::File::try_from(line.as_str()) else {
                continue;
            };
            if !entry.is_file() {
                continue;
            }
            if matcher.is_match(entry.name()) {
                files.push(RemoteFile {
                    name: entry.name().to_string(),
                    size: entry.size() as u64,
                });
            }
        }
        Ok(files)
    }

    fn download(&mut self, remote_path: &str, local_path: &Path) -> Result<(), FtpError> {
        let buffer = self
            .stream
            .retr_as_buffer(remote_path)
            .map_err(|e| FtpError::Transfer {
                path: remote_path.to_string(),
                message: e.to_string(),
            })?;

        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(local_path)?;
        out.write_all(buffer.get_ref())?;
        Ok(())
    }

    fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<(), FtpError> {
        let mut file = std::fs::File::open(local_path)?;
        self.stream
            .put_file(remote_path, &mut file)
            .map_err(|e| FtpError::Transfer {
                path: remote_path.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), FtpError> {
        self.stream.rename(from, to).map_err(|e| FtpError::Transfer {
            path: from.to_string(),
            message: e.to_string(),
        })
    }

    fn mkdir_all(&mut self, dir: &str) -> Result<(), FtpError> {
        // mkdir errors are ignored per segment: existing directories fail
        // with a code that varies by server.
        for segment in parent_chain(dir) {
            let _ = self.stream.mkdir(&segment);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), FtpError> {
        self.stream.quit().map_err(|e| FtpError::Transfer {
            path: String::new(),
            message: e.to_string(),
        })
    }
}

/// Expands a directory path into the chain of paths to create, parents
/// first: `"/a/b/c"` → `["/a", "/a/b", "/a/b/c"]`.
fn parent_chain(dir: &str) -> Vec<String> {
    let absolute = dir.starts_with('/');
    let mut chain = Vec::new();
    let mut current = String::new();

    for part in dir.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        if current.is_empty() {
            current = if absolute {
                format!("/{part}")
            } else {
                part.to_string()
            };
        } else {
            current = format!("{current}/{part}");
        }
        chain.push(current.clone());
    }
    chain
}
