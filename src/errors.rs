//! Unified error types and result handling for the loan ledger.
//!
//! Every fallible operation in the crate returns [`Result`]. Gateway-facing
//! variants carry sanitized messages only; raw upstream payloads and
//! credentials never pass through this type.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad input rejected before any side effect.
    #[error("Validation error: {message}")]
    Validation {
        /// Why the input was rejected
        message: String,
    },

    /// A non-positive or non-finite monetary amount.
    #[error("Invalid amount: {amount}")]
    InvalidAmount {
        /// The offending amount
        amount: f64,
    },

    /// No client matched the given identifier or phone number.
    #[error("Client not found: {key}")]
    ClientNotFound {
        /// Identifier or phone used for the lookup
        key: String,
    },

    /// No loan with the given id.
    #[error("Loan not found: {id}")]
    LoanNotFound {
        /// Loan id used for the lookup
        id: i64,
    },

    /// No payment with the given external reference.
    #[error("Payment not found: {reference}")]
    PaymentNotFound {
        /// External reference used for the lookup
        reference: String,
    },

    /// No penalty with the given id.
    #[error("Penalty not found: {id}")]
    PenaltyNotFound {
        /// Penalty id used for the lookup
        id: i64,
    },

    /// A payment with this external reference already exists. First writer
    /// wins; the prompt is rejected, not silently duplicated.
    #[error("Duplicate payment reference: {reference}")]
    DuplicateReference {
        /// The already-recorded external reference
        reference: String,
    },

    /// A lifecycle transition was attempted from the wrong current state.
    /// Indicates a race between concurrent state changes.
    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        /// Which entity's lifecycle was violated ("loan", "payment", "penalty")
        entity: &'static str,
        /// Expected current state
        from: String,
        /// Requested target state
        to: String,
    },

    /// A gateway callback that reports success but is missing required
    /// settlement fields. Acknowledged at the transport level, flagged
    /// internally for operator review.
    #[error("Malformed gateway callback: {message}")]
    MalformedCallback {
        /// What was missing or unparseable
        message: String,
    },

    /// The gateway accepted the request transport but rejected it.
    #[error("Gateway rejected request: {message}")]
    GatewayRejected {
        /// Sanitized gateway description
        message: String,
    },

    /// The gateway could not be reached or timed out.
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(#[from] reqwest::Error),

    /// Configuration error (settings file, missing credentials).
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration problem
        message: String,
    },

    /// Database error from the persistence layer.
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Environment variable error.
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),
}

/// Convenience `Result` type.
pub type Result<T> = std::result::Result<T, Error>;
