mod client;
mod codec;
mod messages;
mod server;

pub use client::{CallError, call};
pub use codec::JsonCodec;
pub use messages::{Request, Response};
pub use server::{Handler, HandlerError, RpcHandle, RpcServer, handler};
