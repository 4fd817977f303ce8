use thiserror::Error;

/// Error types for GeoFlux operations.
#[derive(Debug, Error)]
pub enum GeoFluxError {
    /// Key is empty, too long, unprintable, or contains a reserved character
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// Latitude/longitude out of range or non-finite
    #[error("invalid location: {0}")]
    InvalidLocation(String),
    /// Geohash is empty or contains characters outside the base-32 alphabet
    #[error("invalid geohash: {0}")]
    InvalidGeohash(String),
    /// Query criteria incomplete or out of range
    #[error("invalid query criteria: {0}")]
    InvalidCriteria(String),
    /// Operation on a cancelled query (cancellation is terminal)
    #[error("query has been cancelled")]
    QueryCancelled,
    /// Engine bookkeeping violated one of its own invariants
    #[error("internal state error: {0}")]
    InternalState(String),
}

/// Result type alias for GeoFlux operations
pub type Result<T> = std::result::Result<T, GeoFluxError>;
