//! Custom error types for polishing operations.

use thiserror::Error;

/// Result type alias for polishing operations
pub type Result<T> = std::result::Result<T, PolishError>;

/// Error type for polishing operations
#[derive(Error, Debug)]
pub enum PolishError {
    /// An evaluator could not score a mutation and has been disabled.
    ///
    /// Aggregate likelihoods computed before this error are stale: the set of
    /// active evaluators changed, so the caller must restart its scoring pass.
    #[error("Evaluator for read '{read_name}' could not score a mutation: {reason}")]
    InvalidEvaluator {
        /// Name of the read whose evaluator was disabled
        read_name: String,
        /// Explanation of why scoring failed
        reason: String,
    },

    /// Structurally malformed mutation
    #[error("Invalid mutation: {reason}")]
    InvalidMutation {
        /// Explanation of the problem
        reason: String,
    },

    /// Invalid parameter value provided
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// A likelihood came back non-finite
    #[error("Non-finite log-likelihood for read '{read_name}'")]
    Numerical {
        /// Name of the offending read
        read_name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_evaluator_message() {
        let error = PolishError::InvalidEvaluator {
            read_name: "movie/42/0_100".to_string(),
            reason: "log-likelihood went non-finite".to_string(),
        };
        let msg = format!("{error}");
        assert!(msg.contains("movie/42/0_100"));
        assert!(msg.contains("non-finite"));
    }

    #[test]
    fn test_invalid_parameter_message() {
        let error = PolishError::InvalidParameter {
            parameter: "separation".to_string(),
            reason: "nonzero separation required".to_string(),
        };
        let msg = format!("{error}");
        assert!(msg.contains("Invalid parameter 'separation'"));
        assert!(msg.contains("nonzero separation required"));
    }
}
