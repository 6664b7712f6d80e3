use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine-level errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Checkpoint store error: {0}")]
    Store(#[from] StoreError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Session busy: {session_id} is locked by another run")]
    SessionBusy { session_id: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Session already exists: {session_id} (resume it instead)")]
    SessionExists { session_id: String },

    #[error("Report error: {message}")]
    Report { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Checkpoint store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Decision-oracle errors
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Oracle unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Malformed oracle reply: {message}")]
    Malformed { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl OracleError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Transport failures, timeouts, 5xx, and 429 are transient; other API
    /// errors and malformed replies are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            OracleError::Unavailable { .. }
            | OracleError::Timeout { .. }
            | OracleError::Http(_) => true,
            OracleError::Api { status, .. } => *status >= 500 || *status == 429,
            OracleError::Malformed { .. } => false,
        }
    }
}

/// Tool invocation errors surfaced by the registry/scheduler.
///
/// Individual collector failures are not errors at this level; they are
/// recorded on the `ToolCallRecord` and analysis continues.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArgs { tool: String, message: String },

    #[error("Tool registration failed: {message}")]
    Registration { message: String },

    #[error("Failed to spawn {tool}: {message}")]
    Spawn { tool: String, message: String },
}

/// Analyzer registry errors.
///
/// A dependency-validation failure is not fatal: it disqualifies the
/// candidate during selection and is recorded as a skipped-candidate note.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("Analyzer dependency unmet for {analyzer}: missing evidence {missing:?}")]
    DependencyUnmet {
        analyzer: String,
        missing: Vec<String>,
    },

    #[error("Analyzer registration failed: {message}")]
    Registration { message: String },
}

/// Stable error codes recorded in session state and aggregated in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Timeout,
    PermissionDenied,
    ResourceNotFound,
    ApiError,
    RateLimited,
    ConfigurationError,
    NetworkError,
    StorageError,
    Unknown,
}

impl ErrorCode {
    /// Classify a collector failure message into a stable code.
    ///
    /// Collectors shell out to kubectl/ovn/ovs, so the signal is in stderr
    /// text rather than typed errors.
    pub fn from_tool_failure(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("timed out") || lower.contains("timeout") {
            ErrorCode::Timeout
        } else if lower.contains("forbidden") || lower.contains("unauthorized") {
            ErrorCode::PermissionDenied
        } else if lower.contains("not found") || lower.contains("notfound") {
            ErrorCode::ResourceNotFound
        } else if lower.contains("connection refused") || lower.contains("no route to host") {
            ErrorCode::NetworkError
        } else {
            ErrorCode::Unknown
        }
    }
}

impl From<&OracleError> for ErrorCode {
    fn from(err: &OracleError) -> Self {
        match err {
            OracleError::Timeout { .. } => ErrorCode::Timeout,
            OracleError::Api { status: 429, .. } => ErrorCode::RateLimited,
            OracleError::Api { .. } => ErrorCode::ApiError,
            OracleError::Malformed { .. } => ErrorCode::ApiError,
            OracleError::Unavailable { .. } | OracleError::Http(_) => ErrorCode::NetworkError,
        }
    }
}

impl From<&EngineError> for ErrorCode {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::Store(_) => ErrorCode::StorageError,
            EngineError::Oracle(e) => e.into(),
            EngineError::Config { .. }
            | EngineError::SessionBusy { .. }
            | EngineError::SessionNotFound { .. }
            | EngineError::SessionExists { .. } => ErrorCode::ConfigurationError,
            EngineError::Tool(_) | EngineError::Report { .. } | EngineError::Internal { .. } => {
                ErrorCode::Unknown
            }
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorCode::ApiError => "API_ERROR",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::StorageError => "STORAGE_ERROR",
            ErrorCode::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

/// One recorded failure in a session's audit trail.
///
/// Stage is kept as plain text so reports stay readable without the engine's
/// stage enum in scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Stable error code.
    pub code: ErrorCode,
    /// Stage name at the time of failure.
    pub stage: String,
    /// Human-readable detail.
    pub message: String,
    /// When the failure was recorded.
    pub at: chrono::DateTime<chrono::Utc>,
}

impl ErrorEntry {
    /// Record a failure against a stage.
    pub fn new(code: ErrorCode, stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            stage: stage.into(),
            message: message.into(),
            at: chrono::Utc::now(),
        }
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type alias for checkpoint store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for oracle operations
pub type OracleResult<T> = Result<T, OracleError>;

/// Result type alias for tool operations
pub type ToolResult<T> = Result<T, ToolError>;

/// Result type alias for analyzer registry operations
pub type AnalyzerResult<T> = Result<T, AnalyzerError>;
