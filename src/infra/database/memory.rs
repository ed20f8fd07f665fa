//! In-process transactional store.
//!
//! Wallets live behind individual async mutexes so a unit of work only blocks
//! the wallets it touches. Transaction records live in a single ordered log.
//! A unit stages balance deltas and appended records privately and publishes
//! them in one synchronous step on commit, while still holding every wallet
//! lock of its scope.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::types::{METADATA_FLAGGED_AT, METADATA_REASON};
use crate::domain::{
    Actor, ActorId, AppError, Currency, DatabaseClient, DatabaseError, FlagOutcome, LedgerError,
    NewActor, NewTransaction, Transaction, TransactionFilter, TransactionId, TransactionReader,
    TransactionStatus, UnitOfWork, Wallet,
};

/// In-memory store configuration
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// How long a unit waits for a wallet lock before reporting a conflict
    pub lock_timeout: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
        }
    }
}

type TransactionLog = Arc<RwLock<BTreeMap<TransactionId, Transaction>>>;

/// In-memory implementation of [`DatabaseClient`]
pub struct InMemoryDatabase {
    actors: DashMap<ActorId, Actor>,
    /// Lower-cased email to actor id
    emails: DashMap<String, ActorId>,
    wallets: DashMap<ActorId, Arc<Mutex<Wallet>>>,
    transactions: TransactionLog,
    config: InMemoryConfig,
}

impl InMemoryDatabase {
    #[must_use]
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            actors: DashMap::new(),
            emails: DashMap::new(),
            wallets: DashMap::new(),
            transactions: Arc::new(RwLock::new(BTreeMap::new())),
            config,
        }
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(InMemoryConfig::default())
    }

    /// Number of stored transaction records, soft-deleted ones included
    pub fn transaction_count(&self) -> usize {
        self.transactions.read().map(|log| log.len()).unwrap_or(0)
    }

    /// Insert a fully formed record, bypassing the engine.
    ///
    /// Used to load history (imports, fixtures) without touching balances.
    pub fn import_transaction(&self, record: Transaction) -> Result<(), AppError> {
        write_log(&self.transactions)?.insert(record.id, record);
        Ok(())
    }

    fn wallet_handle(&self, actor: ActorId) -> Option<Arc<Mutex<Wallet>>> {
        // Clone the Arc so no map shard guard is held across an await
        self.wallets.get(&actor).map(|entry| Arc::clone(entry.value()))
    }

    async fn lock_wallet(
        &self,
        actor: ActorId,
        handle: Arc<Mutex<Wallet>>,
    ) -> Result<OwnedMutexGuard<Wallet>, AppError> {
        tokio::time::timeout(self.config.lock_timeout, handle.lock_owned())
            .await
            .map_err(|_| {
                warn!(actor = %actor, "Timed out waiting for wallet lock");
                AppError::Database(DatabaseError::Conflict(format!(
                    "wallet {} is locked by another unit",
                    actor
                )))
            })
    }
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn read_log(
    log: &TransactionLog,
) -> Result<RwLockReadGuard<'_, BTreeMap<TransactionId, Transaction>>, AppError> {
    log.read()
        .map_err(|_| AppError::Database(DatabaseError::Query("transaction log poisoned".into())))
}

fn write_log(
    log: &TransactionLog,
) -> Result<RwLockWriteGuard<'_, BTreeMap<TransactionId, Transaction>>, AppError> {
    log.write()
        .map_err(|_| AppError::Database(DatabaseError::Query("transaction log poisoned".into())))
}

#[async_trait]
impl DatabaseClient for InMemoryDatabase {
    async fn health_check(&self) -> Result<(), AppError> {
        read_log(&self.transactions).map(|_| ())
    }

    #[instrument(skip(self, scope), fields(scope = scope.len()))]
    async fn begin(&self, scope: &[ActorId]) -> Result<Box<dyn UnitOfWork>, AppError> {
        let mut ordered = scope.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for actor in ordered {
            let handle = self
                .wallet_handle(actor)
                .ok_or(AppError::Ledger(LedgerError::WalletNotFound(actor)))?;
            let guard = self.lock_wallet(actor, handle).await?;
            if guard.is_deleted {
                return Err(AppError::Ledger(LedgerError::WalletNotFound(actor)));
            }
            guards.push((actor, guard));
        }

        Ok(Box::new(MemoryUnit {
            guards,
            deltas: HashMap::new(),
            staged: Vec::new(),
            log: Arc::clone(&self.transactions),
            committed: false,
        }))
    }

    #[instrument(skip(self, actor), fields(email = %actor.email))]
    async fn register_actor(&self, actor: &NewActor) -> Result<Actor, AppError> {
        let email = actor.email.trim().to_ascii_lowercase();
        let id = Uuid::now_v7();

        match self.emails.entry(email.clone()) {
            Entry::Occupied(_) => {
                return Err(AppError::Database(DatabaseError::Duplicate(format!(
                    "actor with email {}",
                    email
                ))));
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let record = Actor {
            id,
            name: actor.name.clone(),
            email,
            is_admin: actor.is_admin,
            is_deleted: false,
            deleted_at: None,
            created_at: Utc::now(),
        };
        self.wallets
            .insert(id, Arc::new(Mutex::new(Wallet::new(id))));
        self.actors.insert(id, record.clone());

        info!(actor = %id, "Actor registered with empty wallet");
        Ok(record)
    }

    async fn get_actor(&self, id: ActorId) -> Result<Option<Actor>, AppError> {
        Ok(self.actors.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_actor_by_email(&self, email: &str) -> Result<Option<Actor>, AppError> {
        let key = email.trim().to_ascii_lowercase();
        let id = match self.emails.get(&key) {
            Some(entry) => *entry.value(),
            None => return Ok(None),
        };
        self.get_actor(id).await
    }

    #[instrument(skip(self))]
    async fn soft_delete_actor(&self, id: ActorId) -> Result<(), AppError> {
        let now = Utc::now();
        {
            let mut actor = self
                .actors
                .get_mut(&id)
                .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;
            actor.is_deleted = true;
            actor.deleted_at = Some(now);
        }

        if let Some(handle) = self.wallet_handle(id) {
            let mut wallet = self.lock_wallet(id, handle).await?;
            wallet.is_deleted = true;
            wallet.deleted_at = Some(now);
            wallet.updated_at = now;
        }
        info!(actor = %id, "Actor and wallet soft-deleted");
        Ok(())
    }

    async fn get_wallet(&self, actor: ActorId) -> Result<Option<Wallet>, AppError> {
        let Some(handle) = self.wallet_handle(actor) else {
            return Ok(None);
        };
        let wallet = handle.lock().await;
        Ok((!wallet.is_deleted).then(|| wallet.clone()))
    }

    async fn list_wallets(&self) -> Result<Vec<Wallet>, AppError> {
        let handles: Vec<Arc<Mutex<Wallet>>> = self
            .wallets
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut wallets = Vec::with_capacity(handles.len());
        for handle in handles {
            let wallet = handle.lock().await;
            if !wallet.is_deleted {
                wallets.push(wallet.clone());
            }
        }
        Ok(wallets)
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, AppError> {
        let log = read_log(&self.transactions)?;
        Ok(log.get(&id).filter(|tx| !tx.is_deleted).cloned())
    }

    async fn query_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, AppError> {
        let log = read_log(&self.transactions)?;
        Ok(filter.apply(log.values()))
    }

    #[instrument(skip(self, reason))]
    async fn mark_flagged(
        &self,
        id: TransactionId,
        reason: &str,
    ) -> Result<FlagOutcome, AppError> {
        let mut log = write_log(&self.transactions)?;
        let tx = log
            .get_mut(&id)
            .filter(|tx| !tx.is_deleted)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;

        match tx.status {
            TransactionStatus::Flagged => {
                debug!(id = %id, "Transaction already flagged");
                Ok(FlagOutcome::AlreadyFlagged)
            }
            TransactionStatus::Completed => {
                tx.status = TransactionStatus::Flagged;
                tx.flagged = true;
                tx.metadata
                    .entry(METADATA_REASON)
                    .or_insert_with(|| Value::String(reason.to_string()));
                tx.metadata.insert(
                    METADATA_FLAGGED_AT.to_string(),
                    Value::String(Utc::now().to_rfc3339()),
                );
                Ok(FlagOutcome::Flagged)
            }
            TransactionStatus::Pending => Err(AppError::Database(DatabaseError::Query(format!(
                "transaction {} is pending and cannot be flagged",
                id
            )))),
        }
    }

    #[instrument(skip(self))]
    async fn soft_delete_transaction(&self, id: TransactionId) -> Result<(), AppError> {
        let mut log = write_log(&self.transactions)?;
        let tx = log
            .get_mut(&id)
            .filter(|tx| !tx.is_deleted)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;
        tx.is_deleted = true;
        tx.deleted_at = Some(Utc::now());
        Ok(())
    }
}

/// Unit of work over a locked set of wallets
struct MemoryUnit {
    guards: Vec<(ActorId, OwnedMutexGuard<Wallet>)>,
    deltas: HashMap<(ActorId, Currency), Decimal>,
    staged: Vec<Transaction>,
    log: TransactionLog,
    committed: bool,
}

impl MemoryUnit {
    fn wallet(&self, actor: ActorId) -> Result<&Wallet, AppError> {
        self.guards
            .iter()
            .find(|(id, _)| *id == actor)
            .map(|(_, guard)| &**guard)
            .ok_or_else(|| {
                AppError::Database(DatabaseError::Query(format!(
                    "wallet {} is outside the unit scope",
                    actor
                )))
            })
    }

    fn staged_balance(&self, actor: ActorId, currency: &Currency) -> Result<Decimal, AppError> {
        let committed = self.wallet(actor)?.balance(currency);
        let delta = self
            .deltas
            .get(&(actor, currency.clone()))
            .copied()
            .unwrap_or_default();
        committed
            .checked_add(delta)
            .ok_or_else(|| balance_overflow(actor, currency))
    }
}

#[async_trait]
impl TransactionReader for MemoryUnit {
    async fn count_transactions(&self, filter: &TransactionFilter) -> Result<usize, AppError> {
        let committed = read_log(&self.log)?
            .values()
            .filter(|tx| filter.matches(tx))
            .count();
        let staged = self.staged.iter().filter(|tx| filter.matches(tx)).count();
        Ok(committed + staged)
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    fn as_reader(&self) -> &dyn TransactionReader {
        self
    }

    async fn balance(&self, actor: ActorId, currency: &Currency) -> Result<Decimal, AppError> {
        self.staged_balance(actor, currency)
    }

    async fn adjust(
        &mut self,
        actor: ActorId,
        currency: &Currency,
        delta: Decimal,
    ) -> Result<Decimal, AppError> {
        let available = self.staged_balance(actor, currency)?;
        let key = (actor, currency.clone());
        let pending = self.deltas.get(&key).copied().unwrap_or_default();
        let (Some(updated), Some(pending)) =
            (available.checked_add(delta), pending.checked_add(delta))
        else {
            return Err(balance_overflow(actor, currency));
        };
        if updated.is_sign_negative() && !updated.is_zero() {
            return Err(AppError::Ledger(LedgerError::InsufficientFunds {
                actor,
                currency: currency.to_string(),
                available,
                requested: -delta,
            }));
        }
        self.deltas.insert(key, pending);
        Ok(updated)
    }

    async fn append(&mut self, record: NewTransaction) -> Result<Transaction, AppError> {
        let tx = Transaction::from_new(record, Utc::now());
        self.staged.push(tx.clone());
        Ok(tx)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), AppError> {
        // Take the log lock first so a poisoned log fails before any wallet changes
        let log = Arc::clone(&self.log);
        let mut log = write_log(&log)?;
        let now = Utc::now();

        // Resolve every new balance before touching a wallet
        let mut updates = Vec::with_capacity(self.deltas.len());
        for ((actor, currency), delta) in &self.deltas {
            if delta.is_zero() {
                continue;
            }
            updates.push((*actor, currency.clone(), self.staged_balance(*actor, currency)?));
        }
        self.deltas.clear();
        for (actor, currency, balance) in updates {
            if let Some((_, wallet)) = self.guards.iter_mut().find(|(id, _)| *id == actor) {
                wallet.balances.insert(currency, balance);
                wallet.updated_at = now;
            }
        }
        for tx in std::mem::take(&mut self.staged) {
            log.insert(tx.id, tx);
        }
        self.committed = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) {
        self.deltas.clear();
        self.staged.clear();
        self.committed = true;
    }
}

fn balance_overflow(actor: ActorId, currency: &Currency) -> AppError {
    AppError::Ledger(LedgerError::BalanceOverflow {
        actor,
        currency: currency.to_string(),
    })
}

impl Drop for MemoryUnit {
    fn drop(&mut self) {
        if !self.committed && (!self.deltas.is_empty() || !self.staged.is_empty()) {
            debug!(
                staged = self.staged.len(),
                "Unit of work dropped without commit; staged changes discarded"
            );
        }
    }
}
