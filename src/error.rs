//! Error types for tile streaming and the sun model.

use thiserror::Error;

/// Failures surfaced by the tile stream. None of these halt the stream.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TileStreamError {
    /// A tile, tile set or payload could not be fetched or decoded.
    #[error("failed to load {url}: {reason}")]
    Load { url: String, reason: String },

    /// The streaming engine could not be constructed.
    #[error("tile engine could not start: {0}")]
    EngineStart(String),

    /// The root tile set did not become available in time.
    #[error("root tile set not ready after {secs:.0}s")]
    Timeout { secs: f32 },
}

/// Failures of a [`SunPosition`](crate::shadows::SunPosition) collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SunPositionError {
    #[error("invalid location lat={latitude} lon={longitude}")]
    InvalidLocation { latitude: f64, longitude: f64 },

    #[error("sun model returned a non-finite opacity")]
    NonFinite,

    #[error("sun position unavailable: {0}")]
    Unavailable(String),
}
