use crate::codec::JsonCodec;
use crate::messages::{Request, Response};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use sluice_secrets::SecretStore;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
#[cfg(not(unix))]
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A method handler: params in, result string (or error string) out.
/// Handlers run concurrently; anything they capture must be shareable.
pub type Handler =
    Arc<dyn Fn(HashMap<String, String>) -> BoxFuture<'static, Result<String, HandlerError>> + Send + Sync>;

/// Wraps an async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(HashMap<String, String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, HandlerError>> + Send + 'static,
{
    Arc::new(move |params| Box::pin(f(params)))
}

enum RpcListener {
    #[cfg(unix)]
    Unix(UnixListener),
    #[cfg(not(unix))]
    Tcp(TcpListener),
}

/// A request/response server on a local stream socket.
///
/// On Unix it listens on a filesystem socket at the given hint path; on other
/// platforms it falls back to loopback TCP with an OS-assigned port. Each
/// accepted connection carries exactly one request and one response.
pub struct RpcServer {
    listener: RpcListener,
    addr: String,
    socket_path: Option<PathBuf>,
    handlers: HashMap<String, Handler>,
}

impl RpcServer {
    /// Creates the listener and registers the default secret handlers
    /// (`get_secret`, `get_secret_field`) when a store is available.
    pub fn bind(
        socket_hint: impl Into<PathBuf>,
        store: Option<Arc<SecretStore>>,
        dag_name: &str,
    ) -> io::Result<Self> {
        let (listener, addr, socket_path) = Self::listen(socket_hint.into())?;

        let mut server = Self {
            listener,
            addr,
            socket_path,
            handlers: HashMap::new(),
        };

        if let Some(store) = store {
            server.register_secret_handlers(store, dag_name);
        }
        Ok(server)
    }

    #[cfg(unix)]
    fn listen(hint: PathBuf) -> io::Result<(RpcListener, String, Option<PathBuf>)> {
        // A stale socket file from a crashed run blocks bind; remove it.
        match std::fs::remove_file(&hint) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let listener = UnixListener::bind(&hint)?;
        let addr = hint.display().to_string();
        Ok((RpcListener::Unix(listener), addr, Some(hint)))
    }

    #[cfg(not(unix))]
    fn listen(_hint: PathBuf) -> io::Result<(RpcListener, String, Option<PathBuf>)> {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;
        let addr = listener.local_addr()?.to_string();
        Ok((RpcListener::Tcp(listener), addr, None))
    }

    /// The address task processes use to connect: a socket file path on Unix,
    /// `host:port` otherwise.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Adds or replaces a method handler. Must be called before
    /// [`RpcServer::start`]; the handler map is immutable while serving.
    pub fn register(&mut self, method: impl Into<String>, handler: Handler) {
        self.handlers.insert(method.into(), handler);
    }

    fn register_secret_handlers(&mut self, store: Arc<SecretStore>, dag_name: &str) {
        {
            let store = Arc::clone(&store);
            let dag = dag_name.to_string();
            self.register(
                "get_secret",
                handler(move |params: HashMap<String, String>| {
                    let store = Arc::clone(&store);
                    let dag = dag.clone();
                    async move {
                        let key = params
                            .get("key")
                            .filter(|k| !k.is_empty())
                            .ok_or("missing required parameter: key")?;
                        Ok(store.resolve(&dag, key)?)
                    }
                }),
            );
        }

        let dag = dag_name.to_string();
        self.register(
            "get_secret_field",
            handler(move |params: HashMap<String, String>| {
                let store = Arc::clone(&store);
                let dag = dag.clone();
                async move {
                    let secret = params
                        .get("secret")
                        .filter(|s| !s.is_empty())
                        .ok_or("missing required parameter: secret")?;
                    let field = params
                        .get("field")
                        .filter(|f| !f.is_empty())
                        .ok_or("missing required parameter: field")?;
                    Ok(store.resolve_field(&dag, secret, field)?)
                }
            }),
        );
    }

    /// Spawns the accept loop and returns a handle for shutdown.
    pub fn start(self, cancel: CancellationToken) -> RpcHandle {
        let addr = self.addr.clone();
        let socket_path = self.socket_path.clone();
        let handlers = Arc::new(self.handlers);
        let tracker = TaskTracker::new();
        let listener = self.listener;

        let accept_tracker = tracker.clone();
        let accept_cancel = cancel.clone();
        let accept = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_cancel.cancelled() => break,
                    accepted = accept_one(&listener) => match accepted {
                        Ok(stream) => {
                            let handlers = Arc::clone(&handlers);
                            accept_tracker.spawn(async move {
                                serve_connection(stream, handlers).await;
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "rpc accept failed");
                            break;
                        }
                    },
                }
            }
        });

        RpcHandle {
            addr,
            socket_path,
            cancel,
            tracker,
            accept,
        }
    }
}

enum RpcStream {
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
    #[cfg(not(unix))]
    Tcp(tokio::net::TcpStream),
}

async fn accept_one(listener: &RpcListener) -> io::Result<RpcStream> {
    match listener {
        #[cfg(unix)]
        RpcListener::Unix(l) => l.accept().await.map(|(s, _)| RpcStream::Unix(s)),
        #[cfg(not(unix))]
        RpcListener::Tcp(l) => l.accept().await.map(|(s, _)| RpcStream::Tcp(s)),
    }
}

async fn serve_connection(stream: RpcStream, handlers: Arc<HashMap<String, Handler>>) {
    match stream {
        #[cfg(unix)]
        RpcStream::Unix(s) => {
            let (read, write) = s.into_split();
            handle_one_request(read, write, handlers).await;
        }
        #[cfg(not(unix))]
        RpcStream::Tcp(s) => {
            let (read, write) = s.into_split();
            handle_one_request(read, write, handlers).await;
        }
    }
}

/// Reads exactly one request, writes exactly one response, and lets the
/// connection close.
async fn handle_one_request<R, W>(read: R, write: W, handlers: Arc<HashMap<String, Handler>>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = FramedRead::new(read, JsonCodec::<Request>::new());
    let mut writer = FramedWrite::new(write, JsonCodec::<Response>::new());

    let response = match reader.next().await {
        Some(Ok(request)) => dispatch(request, &handlers).await,
        Some(Err(e)) => Response::err(format!("invalid request: {e}")),
        None => return,
    };

    if let Err(e) = writer.send(response).await {
        debug!(error = %e, "rpc response write failed");
    }
}

async fn dispatch(request: Request, handlers: &HashMap<String, Handler>) -> Response {
    let Some(handler) = handlers.get(&request.method) else {
        return Response::err(format!("unknown method: {}", request.method));
    };

    match handler(request.params).await {
        Ok(result) => Response::ok(result),
        Err(e) => Response::err(e.to_string()),
    }
}

/// Handle on a running RPC server.
pub struct RpcHandle {
    addr: String,
    socket_path: Option<PathBuf>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    accept: tokio::task::JoinHandle<()>,
}

impl RpcHandle {
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Stops accepting, waits for in-flight connections to finish, and
    /// removes the socket file if one was created.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.accept.await;
        self.tracker.close();
        self.tracker.wait().await;
        if let Some(path) = self.socket_path {
            let _ = std::fs::remove_file(path);
        }
    }
}
