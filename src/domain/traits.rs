//! Domain traits defining contracts for external systems.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::error::AppError;
use super::types::{
    Actor, ActorId, Currency, FlagOutcome, NewActor, NewTransaction, Transaction,
    TransactionFilter, TransactionId, Wallet,
};

/// Read access to transaction history.
///
/// Implemented by every [`UnitOfWork`], so fraud rules evaluated inside a unit
/// see exactly the state the unit will commit against.
#[async_trait]
pub trait TransactionReader: Send + Sync {
    /// Count records matching `filter`
    async fn count_transactions(&self, filter: &TransactionFilter) -> Result<usize, AppError>;
}

/// Atomic context spanning the wallet and transaction collections.
///
/// Obtained from [`DatabaseClient::begin`]. Writes are staged and become
/// visible together on [`UnitOfWork::commit`]. Dropping the unit without
/// committing discards every staged change.
#[async_trait]
pub trait UnitOfWork: TransactionReader {
    /// View this unit as a history reader
    fn as_reader(&self) -> &dyn TransactionReader;

    /// Current balance of `actor` in `currency`, including staged changes
    async fn balance(&self, actor: ActorId, currency: &Currency) -> Result<Decimal, AppError>;

    /// Apply `delta` to a balance and return the new balance.
    ///
    /// Fails with `LedgerError::InsufficientFunds` when the result would be
    /// negative; the unit is left unchanged in that case.
    async fn adjust(
        &mut self,
        actor: ActorId,
        currency: &Currency,
        delta: Decimal,
    ) -> Result<Decimal, AppError>;

    /// Stage a new transaction record
    async fn append(&mut self, record: NewTransaction) -> Result<Transaction, AppError>;

    /// Make every staged change visible at once
    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    /// Discard every staged change
    async fn rollback(self: Box<Self>);
}

/// Transactional store holding actors, wallets and transactions
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Check store connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Open a unit of work over the wallets of `scope`.
    ///
    /// Wallets are acquired in canonical order so that overlapping units never
    /// deadlock. Fails with `LedgerError::WalletNotFound` if any actor in the
    /// scope has no active wallet.
    async fn begin(&self, scope: &[ActorId]) -> Result<Box<dyn UnitOfWork>, AppError>;

    /// Create an actor together with its empty wallet
    async fn register_actor(&self, actor: &NewActor) -> Result<Actor, AppError>;

    /// Look up an actor by id (deleted actors included)
    async fn get_actor(&self, id: ActorId) -> Result<Option<Actor>, AppError>;

    /// Look up an actor by email (deleted actors included)
    async fn find_actor_by_email(&self, email: &str) -> Result<Option<Actor>, AppError>;

    /// Soft-delete an actor and its wallet
    async fn soft_delete_actor(&self, id: ActorId) -> Result<(), AppError>;

    /// Committed wallet of `actor`, `None` when missing or soft-deleted
    async fn get_wallet(&self, actor: ActorId) -> Result<Option<Wallet>, AppError>;

    /// All non-deleted wallets
    async fn list_wallets(&self) -> Result<Vec<Wallet>, AppError>;

    /// Get a single transaction by ID (soft-deleted records are not returned)
    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, AppError>;

    /// Query committed transactions
    async fn query_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, AppError>;

    /// Transition a record to flagged and record `reason`.
    ///
    /// Idempotent: an already-flagged record yields
    /// [`FlagOutcome::AlreadyFlagged`] and is left untouched.
    async fn mark_flagged(&self, id: TransactionId, reason: &str)
    -> Result<FlagOutcome, AppError>;

    /// Set the deletion flag and timestamp; monetary fields are untouched
    async fn soft_delete_transaction(&self, id: TransactionId) -> Result<(), AppError>;
}

/// Outbound alert channel (fire-and-forget from the ledger's point of view)
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one message to a contact address
    async fn notify(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError>;
}
