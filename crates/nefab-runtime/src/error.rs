//! Error types for the kernel runtime

use nefab_fabric::FabricError;
use thiserror::Error;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur while configuring or running a kernel
///
/// Every variant raised during initialisation is init-fatal: the caller
/// logs it and leaves the core idle without starting its timer.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Platform layer error
    #[error("Fabric error: {source}")]
    Fabric {
        #[from]
        /// Source fabric error
        source: FabricError,
    },

    /// Invalid kernel configuration
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Reason for invalid configuration
        reason: String,
    },

    /// Invalid parameter value
    #[error("Invalid parameter {parameter}: {value} (expected {constraint})")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// A filter route referenced a filter that does not exist
    #[error("Route references filter {filter_id} but only {n_filters} filters exist")]
    MissingFilter {
        /// Filter index the route named
        filter_id: u16,
        /// Filters actually configured
        n_filters: usize,
    },

    /// A PES configuration referenced a filter outside the input bank
    #[error("PES error filter {filter_id} does not exist (bank holds {n_filters})")]
    MissingErrorFilter {
        /// Error filter index
        filter_id: u16,
        /// Filters in the bank
        n_filters: usize,
    },

    /// Matrix or vector sizing disagreed with the declared dimensions
    #[error("Size mismatch for {what}: expected {expected} words, got {actual}")]
    SizeMismatch {
        /// What was being sized
        what: String,
        /// Expected element count
        expected: usize,
        /// Actual element count
        actual: usize,
    },
}

impl RuntimeError {
    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(
        parameter: impl Into<String>,
        value: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
            constraint: constraint.into(),
        }
    }

    /// Create a size mismatch error
    pub fn size_mismatch(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::SizeMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = RuntimeError::invalid_config("zero neurons");
        assert!(matches!(err, RuntimeError::InvalidConfiguration { .. }));

        let err = RuntimeError::invalid_parameter("n_dims", "0", "> 0");
        assert!(matches!(err, RuntimeError::InvalidParameter { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = RuntimeError::MissingFilter {
            filter_id: 3,
            n_filters: 1,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("filter 3"));
        assert!(msg.contains("1 filters"));
    }

    #[test]
    fn test_fabric_error_converts() {
        let fab = FabricError::invalid_format("bad");
        let err: RuntimeError = fab.into();
        assert!(matches!(err, RuntimeError::Fabric { .. }));
    }
}
