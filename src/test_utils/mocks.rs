//! Mock implementations for testing.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::domain::{
    Actor, ActorId, AppError, Currency, DatabaseClient, DatabaseError, FlagOutcome, NewActor,
    NewTransaction, Notifier, Transaction, TransactionFilter, TransactionId, TransactionReader,
    UnitOfWork, Wallet,
};
use crate::infra::InMemoryDatabase;

/// Configuration for mock behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub should_fail: bool,
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }
}

/// Mock database client for testing.
///
/// Delegates to a real [`InMemoryDatabase`] and adds failure injection: a
/// blanket failure mode, a number of upcoming commits that report a conflict,
/// and per-record flagging failures.
pub struct MockDatabaseClient {
    inner: InMemoryDatabase,
    config: MockConfig,
    is_healthy: AtomicBool,
    conflicting_commits: Arc<AtomicU32>,
    commit_attempts: Arc<AtomicU32>,
    failing_flags: Mutex<HashSet<TransactionId>>,
    query_gate: Mutex<Option<Arc<Notify>>>,
    query_calls: AtomicU32,
}

impl MockDatabaseClient {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            inner: InMemoryDatabase::with_defaults(),
            config,
            is_healthy: AtomicBool::new(true),
            conflicting_commits: Arc::new(AtomicU32::new(0)),
            commit_attempts: Arc::new(AtomicU32::new(0)),
            failing_flags: Mutex::new(HashSet::new()),
            query_gate: Mutex::new(None),
            query_calls: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Make the next `count` commits fail with a conflict
    pub fn fail_next_commits(&self, count: u32) {
        self.conflicting_commits.store(count, Ordering::SeqCst);
    }

    /// Number of commits attempted so far
    pub fn commit_attempts(&self) -> u32 {
        self.commit_attempts.load(Ordering::SeqCst)
    }

    /// Make `mark_flagged` fail for one record
    pub fn fail_flagging(&self, id: TransactionId) {
        self.failing_flags.lock().unwrap().insert(id);
    }

    /// Park every `query_transactions` call until [`Self::release_queries`]
    pub fn hold_queries(&self) {
        *self.query_gate.lock().unwrap() = Some(Arc::new(Notify::new()));
    }

    /// Wake parked queries and stop parking new ones
    pub fn release_queries(&self) {
        let gate = self.query_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notify_waiters();
        }
    }

    /// Number of `query_transactions` calls that reached the store
    pub fn query_calls(&self) -> u32 {
        self.query_calls.load(Ordering::SeqCst)
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock error".to_string());
            return Err(AppError::Database(DatabaseError::Query(msg)));
        }
        Ok(())
    }
}

impl Default for MockDatabaseClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()?;
        self.inner.health_check().await
    }

    async fn begin(&self, scope: &[ActorId]) -> Result<Box<dyn UnitOfWork>, AppError> {
        self.check_should_fail()?;
        let unit = self.inner.begin(scope).await?;
        Ok(Box::new(MockUnit {
            inner: unit,
            conflicting_commits: Arc::clone(&self.conflicting_commits),
            commit_attempts: Arc::clone(&self.commit_attempts),
        }))
    }

    async fn register_actor(&self, actor: &NewActor) -> Result<Actor, AppError> {
        self.check_should_fail()?;
        self.inner.register_actor(actor).await
    }

    async fn get_actor(&self, id: ActorId) -> Result<Option<Actor>, AppError> {
        self.check_should_fail()?;
        self.inner.get_actor(id).await
    }

    async fn find_actor_by_email(&self, email: &str) -> Result<Option<Actor>, AppError> {
        self.check_should_fail()?;
        self.inner.find_actor_by_email(email).await
    }

    async fn soft_delete_actor(&self, id: ActorId) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.inner.soft_delete_actor(id).await
    }

    async fn get_wallet(&self, actor: ActorId) -> Result<Option<Wallet>, AppError> {
        self.check_should_fail()?;
        self.inner.get_wallet(actor).await
    }

    async fn list_wallets(&self) -> Result<Vec<Wallet>, AppError> {
        self.check_should_fail()?;
        self.inner.list_wallets().await
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, AppError> {
        self.check_should_fail()?;
        self.inner.get_transaction(id).await
    }

    async fn query_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, AppError> {
        self.check_should_fail()?;
        let gate = self.query_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let parked = gate.notified();
            tokio::pin!(parked);
            // Registered before the call is counted, so a release cannot be missed
            parked.as_mut().enable();
            self.query_calls.fetch_add(1, Ordering::SeqCst);
            parked.await;
        } else {
            self.query_calls.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.query_transactions(filter).await
    }

    async fn mark_flagged(
        &self,
        id: TransactionId,
        reason: &str,
    ) -> Result<FlagOutcome, AppError> {
        self.check_should_fail()?;
        let injected = self.failing_flags.lock().unwrap().contains(&id);
        if injected {
            return Err(AppError::Database(DatabaseError::Query(format!(
                "injected flag failure for {}",
                id
            ))));
        }
        self.inner.mark_flagged(id, reason).await
    }

    async fn soft_delete_transaction(&self, id: TransactionId) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.inner.soft_delete_transaction(id).await
    }
}

/// Unit wrapper that can turn a commit into a conflict
struct MockUnit {
    inner: Box<dyn UnitOfWork>,
    conflicting_commits: Arc<AtomicU32>,
    commit_attempts: Arc<AtomicU32>,
}

#[async_trait]
impl TransactionReader for MockUnit {
    async fn count_transactions(&self, filter: &TransactionFilter) -> Result<usize, AppError> {
        self.inner.count_transactions(filter).await
    }
}

#[async_trait]
impl UnitOfWork for MockUnit {
    fn as_reader(&self) -> &dyn TransactionReader {
        self
    }

    async fn balance(&self, actor: ActorId, currency: &Currency) -> Result<Decimal, AppError> {
        self.inner.balance(actor, currency).await
    }

    async fn adjust(
        &mut self,
        actor: ActorId,
        currency: &Currency,
        delta: Decimal,
    ) -> Result<Decimal, AppError> {
        self.inner.adjust(actor, currency, delta).await
    }

    async fn append(&mut self, record: NewTransaction) -> Result<Transaction, AppError> {
        self.inner.append(record).await
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.commit_attempts.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .conflicting_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            // Dropping the inner unit discards its staged changes
            return Err(AppError::Database(DatabaseError::Conflict(
                "injected commit conflict".to_string(),
            )));
        }
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) {
        self.inner.rollback().await;
    }
}

/// Message captured by [`MockNotifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Notifier that records every message instead of sending it
#[derive(Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<SentMessage>>,
    should_fail: AtomicBool,
}

impl MockNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifier whose deliveries always fail
    #[must_use]
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.should_fail.store(true, Ordering::Relaxed);
        notifier
    }

    /// Messages delivered so far
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError> {
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(AppError::Notification("Mock delivery failure".to_string()));
        }
        self.sent.lock().unwrap().push(SentMessage {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
