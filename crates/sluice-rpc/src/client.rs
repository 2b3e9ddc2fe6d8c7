use crate::codec::JsonCodec;
use crate::messages::{Request, Response};
use futures::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

#[derive(Debug, Error)]
pub enum CallError {
    #[error("connecting to {addr}: {source}")]
    Connect { addr: String, source: io::Error },
    #[error("sending request: {0}")]
    Send(io::Error),
    #[error("reading response: {0}")]
    Recv(io::Error),
    #[error("connection closed before a response arrived")]
    Closed,
}

/// Sends one request to an RPC server and reads the single response.
///
/// `addr` is either a socket file path (Unix) or a `host:port` pair.
pub async fn call(addr: &str, request: &Request) -> Result<Response, CallError> {
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        let stream = tokio::net::TcpStream::connect(socket_addr)
            .await
            .map_err(|source| CallError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let (read, write) = stream.into_split();
        return exchange(read, write, request).await;
    }

    #[cfg(unix)]
    {
        let stream = tokio::net::UnixStream::connect(addr)
            .await
            .map_err(|source| CallError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let (read, write) = stream.into_split();
        exchange(read, write, request).await
    }

    #[cfg(not(unix))]
    Err(CallError::Connect {
        addr: addr.to_string(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "not a host:port address"),
    })
}

async fn exchange<R, W>(read: R, write: W, request: &Request) -> Result<Response, CallError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut writer = FramedWrite::new(write, JsonCodec::<Request>::new());
    let mut reader = FramedRead::new(read, JsonCodec::<Response>::new());

    writer
        .send(request.clone())
        .await
        .map_err(CallError::Send)?;

    match reader.next().await {
        Some(Ok(response)) => Ok(response),
        Some(Err(e)) => Err(CallError::Recv(e)),
        None => Err(CallError::Closed),
    }
}
