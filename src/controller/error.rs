//! Error types shared by the volume autoscaler and the autoscaling coordinator

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Error variants are named with the `Error` suffix where they wrap another error type.
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Metrics source error: {0}")]
    MetricsSourceError(#[from] reqwest::Error),

    #[error("Metrics query '{query}' failed: {message}")]
    MetricsQueryFailed { query: String, message: String },

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A computed mutation would break a hard invariant (e.g. shrinking a volume).
    /// Raised before anything is sent to the server.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Missing prerequisite for {subresource} in namespace '{namespace}': {detail}")]
    MissingPrerequisite {
        subresource: String,
        namespace: String,
        detail: String,
    },

    #[error("Timed out after {timeout:?} waiting for {object} to become {condition}")]
    Timeout {
        object: String,
        condition: &'static str,
        timeout: Duration,
    },

    #[error("Failed to {operation} {object}: {source}")]
    Subresource {
        operation: &'static str,
        object: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Reconciliation of {target} failed: {}", ErrorList(.failed))]
    ReconcileFailed { target: String, failed: Vec<Error> },

    #[error("Deletion of {target} failed: {}", ErrorList(.failed))]
    DeletionFailed { target: String, failed: Vec<Error> },
}

impl Error {
    /// Wrap an error with the operation and object it occurred on
    pub fn in_subresource(self, operation: &'static str, object: impl Into<String>) -> Self {
        Error::Subresource {
            operation,
            object: object.into(),
            source: Box::new(self),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(e) => match e {
                kube::Error::Api(api_err) => {
                    // 4xx errors (except 409 Conflict, 429 TooManyRequests) are usually not retryable
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 409 || code == 429;
                    }
                    true
                }
                _ => true,
            },
            Error::MetricsSourceError(_) | Error::MetricsQueryFailed { .. } => true,
            Error::Timeout { .. } => true,
            Error::Subresource { source, .. } => source.is_retryable(),
            Error::ReconcileFailed { failed, .. } | Error::DeletionFailed { failed, .. } => {
                failed.iter().all(Error::is_retryable)
            }
            Error::SerializationError(_)
            | Error::MissingObjectKey(_)
            | Error::InvalidConfig(_)
            | Error::ValidationError(_)
            | Error::InvariantViolation(_)
            | Error::MissingPrerequisite { .. } => false,
        }
    }

    /// Check if this error is a 404 from the API server
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(resp)) => resp.code == 404,
            Error::Subresource { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

struct ErrorList<'a>(&'a [Error]);

impl fmt::Display for ErrorList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Exponential backoff configuration
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        let capped_delay = delay_with_jitter.min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped_delay)
    }

    /// Get the delay for an error, with different handling for retryable vs non-retryable
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        if error.is_retryable() {
            self.delay_for_attempt(attempt)
        } else {
            // Configuration problems need a human; don't hammer the API server meanwhile
            self.max_delay
        }
    }
}
