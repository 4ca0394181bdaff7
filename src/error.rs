//! Error types for the mesh audio application

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Entity error: {0}")]
    Entity(#[from] EntityError),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source/sink registry errors
#[derive(Error, Debug)]
pub enum EntityError {
    #[error("Entity type '{kind}' cannot be constructed locally")]
    UnknownKind { kind: String },

    #[error("Remote descriptor for '{name}' is missing a uuid")]
    MissingUuid { name: String },
}

/// Signaling exchange errors
#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("Protocol version mismatch: local is {local}, remote is {remote}")]
    VersionMismatch { local: String, remote: String },

    #[error("Connection request rejected: {0}")]
    Rejected(String),

    #[error("Signaling request failed: {0}")]
    Request(String),
}

/// Transport session errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Session closed")]
    Closed,

    #[error("No transport session established")]
    NoSession,
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
