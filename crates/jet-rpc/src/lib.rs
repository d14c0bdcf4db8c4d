//! Wire-level building blocks for jet protocol peers.
//!
//! This crate provides the JSON-RPC 2.0 message types, path matchers, and
//! transports that the `jet-peer` engine is built on.
//!
//! # Architecture
//!
//! - [`protocol`]: JSON-RPC 2.0 message types, error codes and jet method names
//! - [`matcher`]: `Matcher` and the `PathFilter` it serializes to
//! - [`codec`]: Length-prefixed text frame codec
//! - [`transport`]: The `Transport` contract and a TCP implementation
//! - [`config`]: Transport configuration
//! - [`error`]: Transport and configuration errors
//!
//! # Example
//!
//! ```no_run
//! use jet_rpc::{StreamTransport, Transport, TransportConfig};
//!
//! # async fn example() -> Result<(), jet_rpc::TransportError> {
//! let transport = StreamTransport::new(TransportConfig::with_address("127.0.0.1:11122"));
//! let mut frames = transport.connect().await?;
//!
//! transport.send(r#"{"jsonrpc":"2.0","method":"info","id":1}"#.to_string())?;
//! if let Some(frame) = frames.recv().await {
//!     println!("daemon says: {frame}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod matcher;
pub mod protocol;
pub mod transport;

pub use codec::{CodecError, TextFrameCodec};
pub use config::TransportConfig;
pub use error::{ConfigError, Result, TransportError};
pub use matcher::{Matcher, PathFilter};
pub use protocol::{
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION, METHOD_NOT_FOUND, Request,
    RequestId, Response, RpcError, TIMEOUT, timeout_secs,
};
pub use transport::{StreamTransport, Transport};
