mod client;
mod endpoint;
mod glob;

pub use client::{FtpConnector, FtpError, Remote, RemoteDir, RemoteFile};
pub use endpoint::{FtpEndpoint, endpoint_from_secret, resolve_endpoint};
pub use glob::{NameMatcher, matches_name};
