//! Error taxonomy for the gateway core.
//!
//! Every category maps to one of the error classes in the request-processing
//! design: validation, authorization, billing, missing configuration,
//! downstream collaborator failures, cancellation, and recorder failures.
//! Handlers and components return `Result<T, CoreError>`; the tool-call
//! envelope (`core::registry`) is the only place an `Err` turns into an
//! in-protocol tool error instead of propagating further.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),

    #[error("missing authorization bearer token")]
    MissingAuthorization,

    #[error("malformed authorization header: {0}")]
    MalformedAuthorization(String),

    #[error("billing check failed: {0}")]
    Billing(String),

    #[error("{0} is not configured")]
    NotConfigured(String),

    #[error("{0}")]
    Downstream(String),

    #[error("cancelled")]
    Cancelled,

    #[error("timed out")]
    TimedOut,
}

impl CoreError {
    /// Short, actionable message suitable as the single text content entry
    /// of an in-protocol tool error.
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            CoreError::MissingAuthorization | CoreError::MalformedAuthorization(_)
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
