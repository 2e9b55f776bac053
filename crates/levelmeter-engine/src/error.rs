//! Error types for the engine.

use thiserror::Error;

use levelmeter_transport::TransportError;

/// Errors reported by the engine.
///
/// None of these are fatal: each is surfaced to the host and the engine
/// carries on with the next frame or command.
#[derive(Debug, Clone, Error)]
pub enum LevelsError {
    /// Transport failure (connect, lost connection).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Frame was an empty object.
    #[error("No data in levels update")]
    NoData,

    /// Frame was not valid JSON or a field had the wrong type.
    #[error("Malformed levels update: {0}")]
    MalformedFrame(String),

    /// Frame parsed but matched no known payload shape.
    #[error("Unexpected data {0}")]
    UnexpectedData(String),

    /// Device was never loaded or subscribed.
    #[error("Unknown device {0}")]
    UnknownDevice(String),
}
