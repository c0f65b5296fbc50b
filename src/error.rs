//! Error types for the transaction sentry

use thiserror::Error;

/// Main error type for the sentry engine
#[derive(Error, Debug)]
pub enum SentryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid nonce for {key}: expected {expected}, got {got}")]
    InvalidNonce {
        key: String,
        expected: u64,
        got: u64,
    },

    #[error("Chain rejected nonce: {0}")]
    NonceTooLow(String),

    #[error("Reached max nonce recovery for {key} after {attempts} attempts")]
    MaxRecoveryReached { key: String, attempts: u64 },

    #[error("Scheduler error in {component}: {message}")]
    Scheduler { component: String, message: String },

    #[error("RPC error for chain {chain_uuid}: {message}")]
    Rpc { chain_uuid: String, message: String },

    #[error("Nonce store error: {0}")]
    Store(String),

    #[error("Invalid retry policy: {0}")]
    RetryPolicy(String),

    #[error("Job {job_uuid} not found")]
    JobNotFound { job_uuid: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SentryError {
    /// Warnings drive the nonce recovery path and never abort the caller.
    pub fn is_nonce_warning(&self) -> bool {
        matches!(
            self,
            SentryError::InvalidNonce { .. } | SentryError::NonceTooLow(_)
        )
    }

    /// Transient errors are retried with backoff at the session level.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SentryError::Scheduler { .. } | SentryError::Rpc { .. } | SentryError::Store(_)
        )
    }

    /// Wrap a scheduler-client failure with the component that observed it.
    pub fn scheduler(component: &str, message: impl ToString) -> Self {
        SentryError::Scheduler {
            component: component.to_string(),
            message: message.to_string(),
        }
    }
}

/// Check whether an error message from the chain belongs to the
/// nonce-too-low class. Node implementations disagree on wording.
pub fn is_nonce_too_low(message: &str) -> bool {
    let msg = message.to_lowercase();
    msg.contains("nonce too low") || msg.contains("incorrect nonce")
}

/// Result type for sentry operations
pub type SentryResult<T> = Result<T, SentryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_nonce_too_low_messages() {
        assert!(is_nonce_too_low("nonce too low"));
        assert!(is_nonce_too_low("Nonce too low: next nonce 5"));
        assert!(is_nonce_too_low("Incorrect nonce"));
        assert!(!is_nonce_too_low("insufficient funds"));
    }

    #[test]
    fn taxonomy_splits_warnings_and_transients() {
        let warning = SentryError::InvalidNonce {
            key: "0xabc@1".into(),
            expected: 5,
            got: 7,
        };
        assert!(warning.is_nonce_warning());
        assert!(!warning.is_transient());

        let transient = SentryError::scheduler("retry-session-job", "connection refused");
        assert!(transient.is_transient());
        assert!(!transient.is_nonce_warning());

        let fatal = SentryError::MaxRecoveryReached {
            key: "0xabc@1".into(),
            attempts: 6,
        };
        assert!(!fatal.is_nonce_warning());
        assert!(!fatal.is_transient());
    }
}
