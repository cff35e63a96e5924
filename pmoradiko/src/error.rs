//! Error types for the radiko recorder

/// Result type alias for radiko operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while authenticating, looking up, capturing,
/// merging or saving a program
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required external tool is missing or unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network failure during an HTTP round-trip
    #[error("HTTP request failed ({stage}): {source}")]
    Transport {
        stage: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The provider answered with a non-2xx status
    #[error("HTTP request failed ({stage}): status {status} for {url}")]
    HttpStatus {
        stage: &'static str,
        status: u16,
        url: String,
    },

    /// The key extraction tool is missing or failed
    #[error("Key extraction failed: {0}")]
    Extraction(String),

    /// The provider response does not have the expected handshake shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No program currently airing
    #[error("Not found: {0}")]
    NotFound(String),

    /// The capture/decode process pair failed
    #[error("Capture failed: {0}")]
    Capture(String),

    /// The concatenation step failed
    #[error("Merge failed: {0}")]
    Merge(String),

    /// Saving the final artifact failed
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// Schedule or sidecar XML could not be decoded
    #[error("XML decoding failed: {0}")]
    Xml(#[from] quick_xml::de::DeError),

    /// Sidecar XML could not be encoded
    #[error("XML encoding failed: {0}")]
    XmlEncode(#[from] quick_xml::se::SeError),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The shared cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,

    /// The session ended without a single usable capture
    #[error("Empty outputs: {0}")]
    EmptyOutputs(String),
}

impl Error {
    /// Wrap a `reqwest` failure with the handshake/lookup stage it happened in
    pub fn transport(stage: &'static str, source: reqwest::Error) -> Self {
        Self::Transport { stage, source }
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a capture error
    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture(msg.into())
    }

    /// Whether the session supervisor may start another attempt after this error.
    ///
    /// Missing tools, a schedule with nothing on air and cancellation are
    /// terminal; network, handshake, extraction and pipeline failures are not.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Config(_) | Self::NotFound(_) | Self::Cancelled | Self::EmptyOutputs(_)
        )
    }
}
