use crate::tier::Tier;
use thiserror::Error;

/// Error types for strata cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid client prefix: {message}")]
    InvalidPrefix { message: String },

    #[error("{operation}: missing required parameters")]
    MissingParameters { operation: String },

    #[error("Dependency for the {tier} tier is not available")]
    DependencyNotFound { tier: Tier },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("The {tier} tier has not been initialized")]
    UninitializedTier { tier: Tier },

    #[error("{tier} backend error: {message}")]
    Backend { tier: Tier, message: String },

    #[error("Save failed on {} tier(s): {}", .failures.len(), join_failures(.failures))]
    SaveFailed { failures: Vec<TierFailure> },

    #[error("Eviction failed on {} tier(s): {}", .failures.len(), join_failures(.failures))]
    EvictionFailed { failures: Vec<TierFailure> },

    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// A single tier's contribution to an aggregate failure.
#[derive(Debug, Clone)]
pub struct TierFailure {
    pub tier: Tier,
    pub message: String,
}

impl TierFailure {
    pub fn new(tier: Tier, message: impl Into<String>) -> Self {
        Self {
            tier,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TierFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.tier, self.message)
    }
}

fn join_failures(failures: &[TierFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CacheError {
    // Constructor methods for common error scenarios

    pub fn invalid_prefix(message: impl Into<String>) -> Self {
        Self::InvalidPrefix {
            message: message.into(),
        }
    }

    pub fn missing_parameters(operation: impl Into<String>) -> Self {
        Self::MissingParameters {
            operation: operation.into(),
        }
    }

    #[must_use]
    pub const fn dependency_not_found(tier: Tier) -> Self {
        Self::DependencyNotFound { tier }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn uninitialized(tier: Tier) -> Self {
        Self::UninitializedTier { tier }
    }

    pub fn backend(tier: Tier, message: impl Into<String>) -> Self {
        Self::Backend {
            tier,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn save_failed(failures: Vec<TierFailure>) -> Self {
        Self::SaveFailed { failures }
    }

    #[must_use]
    pub fn eviction_failed(failures: Vec<TierFailure>) -> Self {
        Self::EvictionFailed { failures }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Caller passed something structurally wrong, as opposed to a tier
    /// misbehaving at runtime. These propagate through aggregation
    /// boundaries unchanged.
    #[must_use]
    pub const fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPrefix { .. } | Self::MissingParameters { .. }
        )
    }

    #[must_use]
    pub const fn is_backend_error(&self) -> bool {
        matches!(self, Self::Backend { .. })
    }

    #[must_use]
    pub const fn is_aggregate(&self) -> bool {
        matches!(self, Self::SaveFailed { .. } | Self::EvictionFailed { .. })
    }

    /// Tier failures carried by an aggregate error, empty for other variants.
    #[must_use]
    pub fn tier_failures(&self) -> &[TierFailure] {
        match self {
            Self::SaveFailed { failures } | Self::EvictionFailed { failures } => failures,
            _ => &[],
        }
    }

    /// Get error category for classification
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidPrefix { .. } | Self::MissingParameters { .. } => {
                ErrorCategory::InvalidInput
            }
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::DependencyNotFound { .. } | Self::UninitializedTier { .. } => {
                ErrorCategory::Unavailable
            }
            Self::Backend { .. } | Self::SaveFailed { .. } | Self::EvictionFailed { .. } => {
                ErrorCategory::Backend
            }
            Self::Serialization { .. } => ErrorCategory::Serialization,
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

/// Error categories for metrics and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidInput,
    Configuration,
    Unavailable,
    Backend,
    Serialization,
}

impl ErrorCategory {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid-input",
            Self::Configuration => "configuration",
            Self::Unavailable => "unavailable",
            Self::Backend => "backend",
            Self::Serialization => "serialization",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
