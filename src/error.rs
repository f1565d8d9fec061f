//! Error types for the consensus engine, transport, and configuration layers.
//!
//! State-machine apply has no failure modes so it gets no error type of its
//! own; unknown command types are simply applied as no-ops.

use std::net::SocketAddr;
use thiserror::Error;

/// Failures from sending or receiving a RAFT RPC over the wire.
///
/// Every variant here is non-fatal: peer threads treat any `TransportError`
/// identically to "no reply" and retry on the next tick.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("rpc to {addr} timed out")]
    Timeout { addr: SocketAddr },

    #[error("i/o error talking to {addr}: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed frame from {addr}: {source}")]
    Decode {
        addr: SocketAddr,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected reply shape from {addr}")]
    UnexpectedReply { addr: SocketAddr },
}

/// Failures loading or validating a node's configuration. These are the only
/// runtime errors that should ever cause the process to exit non-zero.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("self node id {node_id:?} not found among configured peers")]
    SelfNotInPeers { node_id: String },

    #[error("failed to bind {role} listener on {addr}: {source}")]
    Bind {
        role: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}
