//! Error handling for the measurement engine.
//!
//! This module defines the core error handling infrastructure used
//! throughout the engine. It provides:
//! - `EngineError` trait for consistent error handling
//! - Specific error types for different domains (network, protocol,
//!   geolocation, assets, collector, bouncer, nettest, validation)
//! - Integration with `thiserror` for ergonomic error handling
//!
//! # Design Principles
//! - All errors implement Send + Sync for async compatibility
//! - Use thiserror for library errors, anyhow for application errors
//! - Provide clear, actionable error messages
//! - Support error chaining and context

use thiserror::Error;

/// Base trait for all engine-specific errors.
///
/// This trait ensures all engine errors are:
/// - Thread-safe (Send + Sync)
/// - Static lifetime (no borrowed data)
/// - Implement standard Error trait
pub trait EngineError: std::error::Error + Send + Sync + 'static {}

/// Network-related errors.
///
/// These errors occur during one-shot HTTP requests, WebSocket dials,
/// or DNS lookups.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// The transport failed before a response was received
    #[error("HTTP request to {url} failed: {source}")]
    TransportFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The server answered with a non-200 status
    #[error("HTTP request to {url} failed with status {status}")]
    RequestFailed { url: String, status: u16 },

    /// The response body exceeded the in-memory read bound
    #[error("response body from {url} exceeds {limit} bytes")]
    BodyTooLarge { url: String, limit: usize },

    /// The request URL could not be parsed or joined
    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// DNS resolution failed or returned an unexpected shape
    #[error("name resolution failed for {host}: {details}")]
    ResolutionFailed { host: String, details: String },

    /// The enclosing scope was cancelled mid-operation
    #[error("operation {operation} cancelled")]
    Cancelled { operation: String },
}

impl EngineError for NetworkError {}

impl NetworkError {
    /// Create a transport error from any underlying error type
    pub fn transport_failed(
        url: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::TransportFailed {
            url: url.into(),
            source: Box::new(source),
        }
    }
}

/// Protocol errors: a peer answered, but not with what we expected.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A JSON payload could not be decoded
    #[error("cannot decode {context}: {source}")]
    JsonDecode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// A JSON payload could not be encoded
    #[error("cannot encode {context}: {source}")]
    JsonEncode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// An XML payload could not be decoded
    #[error("cannot decode {context}: {details}")]
    XmlDecode { context: String, details: String },

    /// A value in a response is not what the protocol allows
    #[error("invalid {field} in response: {value}")]
    InvalidValue { field: String, value: String },
}

impl EngineError for ProtocolError {}

/// Geolocation errors: probe-IP discovery and MMDB lookups.
#[derive(Error, Debug)]
pub enum GeoError {
    /// The database file could not be opened or read
    #[error("cannot read database {path}: {source}")]
    DatabaseRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The gzip stream wrapping the database is corrupt. This includes
    /// trailing-CRC failures surfaced at end of stream.
    #[error("cannot decompress database {path}: {source}")]
    Gunzip {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The MMDB reader rejected the database or the lookup
    #[error("database lookup failed: {source}")]
    Lookup {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The probe-IP endpoint returned something that is not an IP literal
    #[error("invalid IP address: {value}")]
    InvalidIp { value: String },

    /// The probe-IP endpoint could not be reached or decoded
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The probe-IP response was malformed
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl EngineError for GeoError {}

/// Asset-cache errors.
#[derive(Error, Debug)]
pub enum AssetError {
    /// The asset could not be downloaded
    #[error("cannot download asset {name}: {source}")]
    DownloadFailed {
        name: String,
        #[source]
        source: NetworkError,
    },

    /// The downloaded bytes do not match the pinned checksum
    #[error("asset {name} does not match its expected SHA-256")]
    HashMismatch { name: String },

    /// A filesystem operation on the cache failed
    #[error("asset cache I/O error for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError for AssetError {}

/// Errors talking to discovery services (bouncer, mlab-ns).
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl EngineError for DiscoveryError {}

/// Collector client errors.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Update or close was attempted on a report that is not open
    #[error("report is not open")]
    ReportNotOpen,
}

impl EngineError for CollectorError {}

/// Nettest lifecycle errors.
#[derive(Error, Debug)]
pub enum NettestError {
    /// No configured bouncer returned a collector list
    #[error("cannot discover available collectors")]
    NoCollectors,

    /// No configured bouncer returned a test-helpers map
    #[error("cannot discover available test helpers")]
    NoTestHelpers,

    /// Every available collector refused to open a report
    #[error("cannot open report with any available collector")]
    CannotOpenReport,

    /// mlab-ns returned no usable server for this experiment
    #[error("no available measurement servers")]
    NoAvailableServers,

    /// The nettest has no experiment attached
    #[error("nettest has no experiment to run")]
    MissingExperiment,

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl EngineError for NettestError {}

/// Validation errors for embedder-supplied values.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// A timeout is negative or exceeds the allowed maximum
    #[error("timeout {value} is negative or too large")]
    InvalidTimeout { value: i64 },

    /// A required option was left empty
    #[error("empty_variable: {name}")]
    EmptyVariable { name: String },

    /// The requested nettest name is not known to this engine
    #[error("unknown_nettest_error")]
    UnknownNettest { name: String },
}

impl EngineError for ValidationError {}
