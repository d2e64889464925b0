/// Top-level depscope error type.
///
/// Only configuration and I/O level problems surface here. Data-quality
/// issues (unparsable dependency lines, unmatched reconciliation entries,
/// failed fetch units) are reported through counts and manifests instead.
#[derive(thiserror::Error, Debug)]
pub enum DepscopeError {
    /// Error in configuration parsing or validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Error talking to the registry or a repository host.
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Error reading or decoding a data source.
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
}

/// Errors in depscope configuration parsing and validation.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist at the expected path.
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Configuration values are present but semantically invalid.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Configuration file syntax could not be parsed (TOML error).
    #[error("Parse error: {0}")]
    Parse(String),
}

/// A single failed fetch attempt.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Connection, DNS, TLS or timeout failure.
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// The response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The operation deadline passed before this unit could (re)try.
    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => *status == 403 || *status == 429 || *status >= 500,
            Self::Decode(_) | Self::DeadlineExceeded => false,
        }
    }
}

/// Errors reading on-disk or in-memory data sources.
#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    /// Filesystem I/O error.
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON could not be decoded into the expected shape.
    #[error("JSON error in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience alias for `Result<T, DepscopeError>`.
pub type Result<T> = std::result::Result<T, DepscopeError>;
