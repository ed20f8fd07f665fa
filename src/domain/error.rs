//! Error taxonomy for the ledger.
//!
//! Every fallible operation returns [`AppError`]. Inner enums group failures by
//! the layer that raised them so callers can decide how to react (reject,
//! retry, or surface).

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Top-level application error
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether repeating the same operation may succeed.
    ///
    /// Only store commit conflicts and lost connections qualify: the unit was
    /// aborted before anything became visible, so a replay is safe.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Database(DatabaseError::Conflict(_) | DatabaseError::Connection(_))
        )
    }
}

/// Input validation failures, raised before any store access
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Amount must be greater than zero, got {0}")]
    InvalidAmount(String),

    #[error("Invalid currency code '{0}'")]
    InvalidCurrency(String),

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("{0}")]
    Multiple(String),
}

/// Business rule violations detected inside an atomic unit
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Insufficient funds for actor {actor}: available {available} {currency}, requested {requested}")]
    InsufficientFunds {
        actor: Uuid,
        currency: String,
        available: Decimal,
        requested: Decimal,
    },

    #[error("Actor not found: {0}")]
    ActorNotFound(String),

    #[error("Cannot transfer to self")]
    SelfTransfer,

    #[error("No active wallet for actor {0}")]
    WalletNotFound(Uuid),

    #[error("Balance of actor {actor} in {currency} would exceed the representable maximum")]
    BalanceOverflow { actor: Uuid, currency: String },

    #[error("Total for {0} exceeds the representable maximum")]
    TotalOverflow(String),
}

/// Store failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// The store detected a concurrent write and aborted the unit.
    #[error("Commit conflict: {0}")]
    Conflict(String),
}

/// Configuration loading failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue { name: String, value: String },
}

/// Fraud scan failures that abort a whole run
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("A fraud scan is already running")]
    AlreadyRunning,

    #[error("Fraud scan failed: {0}")]
    Store(#[from] AppError),
}
