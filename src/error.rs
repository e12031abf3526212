//! Error types for fluxgate

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for fluxgate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration errors (abort startup)
    #[error("Configuration error: {0}")]
    Config(String),
    /// Transport errors talking to a backend
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// A line ended before the measurement delimiter
    #[error("line ended before measurement delimiter")]
    UnexpectedEndOfLine,
    /// Measurement key exceeded the scanner bound
    #[error("measurement key longer than {0} bytes")]
    KeyTooLong(usize),
    /// Malformed line-protocol row
    #[error("unable to parse points: {0}")]
    InvalidPoint(String),
    /// Unknown timestamp precision
    #[error("invalid precision: {0}")]
    InvalidPrecision(String),
    /// Query rejected by the forbidden/obligated policy
    #[error("query forbidden")]
    QueryForbidden,
    /// No measurement could be located in the query text
    #[error("can't get measurement: {0}")]
    NoMeasurement(String),
    /// Retry buffer rejected a write
    #[error("retry buffer full")]
    BufferFull,
    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
