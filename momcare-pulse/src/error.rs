//! Error types for the pulse hub.
//!
//! Each failure domain has its own enum so callers can tell a closed stream
//! from a missing recipient without string matching. Only `ApiError` ever
//! reaches a client; the others are logged where they happen.

use std::io;
use thiserror::Error;

/// A subscriber could not accept a delivered sample.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    /// The consumer behind the sink has gone away.
    #[error("subscriber is closed")]
    Closed,
    /// The consumer is not draining its buffer fast enough.
    #[error("subscriber buffer is full")]
    Lagging,
    #[error("subscriber failed: {0}")]
    Other(String),
}

/// The hardware sample source failed and the simulator should take over.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open serial device {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("serial read failed: {0}")]
    Read(#[from] io::Error),
    #[error("serial device closed the stream")]
    Disconnected,
}

/// An alert could not be delivered to its recipient.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no recipient registered for {0}")]
    UnknownRecipient(String),
    #[error("alert delivery failed: {0}")]
    Delivery(String),
}
