//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Local socket bind, accept, or write failure.
    Ipc(String),
    /// Envelope framing or decoding failure.
    Codec(String),
    /// Peer could not reach the rendezvous endpoint.
    Connect(String),
    /// Multiplexer pane operation failure.
    Pane(String),
    /// Canvas process could not be launched.
    Spawn(String),
    /// Canvas kind or scenario could not be resolved.
    Resolve(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::Codec(msg) => write!(f, "codec: {msg}"),
            Self::Connect(msg) => write!(f, "connect: {msg}"),
            Self::Pane(msg) => write!(f, "pane: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Resolve(msg) => write!(f, "resolve: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
