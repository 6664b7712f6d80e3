use std::env;
use std::path::PathBuf;

use crate::error::EngineError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub oracle: OracleConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub engine: EngineConfig,
    pub report: ReportConfig,
    pub kube: KubeConfig,
}

/// Decision-oracle endpoint configuration
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub api_key: String,
    pub base_url: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration for the oracle client
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Workflow engine tuning knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on reasoning rounds in the analyze stage.
    pub max_rounds: u32,
    /// Maximum tool calls in flight within one batch.
    pub tool_concurrency: usize,
    /// Per-call timeout for collector tools, in milliseconds.
    pub tool_timeout_ms: u64,
    /// Per-check timeout for the baseline health snapshot, in milliseconds.
    pub baseline_timeout_ms: u64,
    /// Poll interval while waiting for a human-review decision.
    pub review_poll_ms: u64,
    /// How long the review gate waits before giving up.
    pub review_timeout_ms: u64,
    /// Session lease time-to-live; refreshed on every checkpoint save.
    pub lease_ttl_ms: u64,
    /// Classification confidence floor; below it the category falls back to
    /// general.
    pub min_confidence: f64,
    /// Character budget for the evidence digest injected into oracle
    /// context.
    pub context_budget_chars: usize,
    /// Whether approved fixes may actually be executed.
    pub execute_enabled: bool,
}

/// Report output configuration
#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub dir: PathBuf,
    /// Truncation limit for string payloads in the report.
    pub max_field_chars: usize,
}

/// Cluster access configuration for the collector tools
#[derive(Debug, Clone)]
pub struct KubeConfig {
    pub namespace: String,
    pub kubectl_bin: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, EngineError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let oracle = OracleConfig {
            api_key: env::var("ORACLE_API_KEY").map_err(|_| EngineError::Config {
                message: "ORACLE_API_KEY is required".to_string(),
            })?,
            base_url: env::var("ORACLE_BASE_URL")
                .unwrap_or_else(|_| "https://api.ovn-triage.dev".to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/triage.db".to_string()),
            ),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30000),
            max_retries: env::var("MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            retry_delay_ms: env::var("RETRY_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
        };

        let engine = EngineConfig {
            max_rounds: env::var("MAX_ROUNDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            tool_concurrency: env::var("TOOL_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            tool_timeout_ms: env::var("TOOL_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30000),
            baseline_timeout_ms: env::var("BASELINE_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10000),
            review_poll_ms: env::var("REVIEW_POLL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5000),
            review_timeout_ms: env::var("REVIEW_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1_800_000),
            lease_ttl_ms: env::var("LEASE_TTL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(600_000),
            min_confidence: env::var("MIN_CONFIDENCE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.5),
            context_budget_chars: env::var("CONTEXT_BUDGET_CHARS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10_000),
            execute_enabled: env::var("EXECUTE_ENABLED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
        };

        let report = ReportConfig {
            dir: PathBuf::from(
                env::var("REPORT_DIR").unwrap_or_else(|_| "./reports".to_string()),
            ),
            max_field_chars: env::var("REPORT_MAX_FIELD_CHARS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4000),
        };

        let kube = KubeConfig {
            namespace: env::var("KUBE_NAMESPACE").unwrap_or_else(|_| "kube-system".to_string()),
            kubectl_bin: env::var("KUBECTL_BIN").unwrap_or_else(|_| "kubectl".to_string()),
        };

        Ok(Config {
            oracle,
            database,
            logging,
            request,
            engine,
            report,
            kube,
        })
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            tool_concurrency: 3,
            tool_timeout_ms: 30000,
            baseline_timeout_ms: 10000,
            review_poll_ms: 5000,
            review_timeout_ms: 1_800_000,
            lease_ttl_ms: 600_000,
            min_confidence: 0.5,
            context_budget_chars: 10_000,
            execute_enabled: true,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./reports"),
            max_field_chars: 4000,
        }
    }
}

impl Default for KubeConfig {
    fn default() -> Self {
        Self {
            namespace: "kube-system".to_string(),
            kubectl_bin: "kubectl".to_string(),
        }
    }
}
