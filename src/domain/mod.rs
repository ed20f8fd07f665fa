//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{AppError, ConfigError, DatabaseError, LedgerError, ScanError, ValidationError};
pub use traits::{DatabaseClient, Notifier, TransactionReader, UnitOfWork};
pub use types::{
    Actor, ActorId, BalanceRanking, Currency, DepositRequest, FlagOutcome, FraudOutcome,
    HealthResponse, HealthStatus, HistoryParams, NewActor, NewTransaction, OperationReceipt,
    Principal, Recipient, SortOrder, Transaction, TransactionFilter, TransactionId,
    TransactionKind, TransactionStatus, TransferRequest, Wallet, WithdrawRequest,
};
