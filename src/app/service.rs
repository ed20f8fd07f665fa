//! Ledger service: the transfer engine plus read and admin operations.
//!
//! Every mutation runs as one unit of work: balances are adjusted, fraud rules
//! are evaluated against what the unit sees, the record is appended with the
//! outcome folded in, and everything commits together. Alerts for flagged
//! operations go out only after the commit succeeded.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use crate::config::env_or;
use crate::domain::{
    Actor, ActorId, AppError, BalanceRanking, ConfigError, Currency, DatabaseClient, DatabaseError,
    DepositRequest, HealthStatus, HistoryParams, LedgerError, NewActor, NewTransaction, Notifier,
    OperationReceipt, Principal, Recipient, SortOrder, Transaction, TransactionFilter,
    TransactionId, TransactionKind, TransferRequest, ValidationError, WithdrawRequest,
};
use crate::infra::SlidingWindowLimiter;

use super::fraud::{FraudCheck, FraudEvaluator};

/// Default number of entries in the top-balances report
pub const DEFAULT_TOP_BALANCES: usize = 10;

/// Maximum backoff between commit attempts
const MAX_BACKOFF_MS: u64 = 1_000;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Attempts per operation when the store reports a transient conflict
    pub max_commit_attempts: u32,
    /// Delay before the first replay; doubles on every further attempt
    pub retry_base_delay: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: 3,
            retry_base_delay: Duration::from_millis(10),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let max_commit_attempts: u32 = env_or("MAX_COMMIT_ATTEMPTS", defaults.max_commit_attempts)?;
        if max_commit_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_COMMIT_ATTEMPTS".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(Self {
            max_commit_attempts,
            ..defaults
        })
    }
}

/// Application service containing the ledger's business logic
pub struct LedgerService {
    db_client: Arc<dyn DatabaseClient>,
    notifier: Arc<dyn Notifier>,
    evaluator: FraudEvaluator,
    rate_limiter: Option<Arc<SlidingWindowLimiter>>,
    config: ServiceConfig,
}

impl LedgerService {
    #[must_use]
    pub fn new(db_client: Arc<dyn DatabaseClient>, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_config(
            db_client,
            notifier,
            FraudEvaluator::default(),
            ServiceConfig::default(),
        )
    }

    #[must_use]
    pub fn with_config(
        db_client: Arc<dyn DatabaseClient>,
        notifier: Arc<dyn Notifier>,
        evaluator: FraudEvaluator,
        config: ServiceConfig,
    ) -> Self {
        Self {
            db_client,
            notifier,
            evaluator,
            rate_limiter: None,
            config,
        }
    }

    /// Throttle mutating operations per actor (builder pattern)
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<SlidingWindowLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Create an actor and its empty wallet
    #[instrument(skip(self, actor), fields(email = %actor.email))]
    pub async fn register_actor(&self, actor: &NewActor) -> Result<Actor, AppError> {
        actor.validate().map_err(|e| {
            warn!(error = %e, "Registration validation failed");
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;
        self.db_client.register_actor(actor).await
    }

    /// Credit the caller's wallet
    #[instrument(skip(self, principal, request), fields(actor = %principal.actor_id, amount = %request.amount))]
    pub async fn deposit(
        &self,
        principal: &Principal,
        request: &DepositRequest,
    ) -> Result<OperationReceipt, AppError> {
        authenticate(principal)?;
        self.throttle(principal)?;
        let currency = request.check()?;
        let actor = principal.actor_id;
        let amount = request.amount;

        let tx = self
            .with_retry("deposit", move || self.try_deposit(actor, amount, currency.clone()))
            .await?;
        info!(id = %tx.id, flagged = tx.flagged, "Deposit committed");

        self.alert_if_flagged(&principal.email, "Suspicious Deposit Alert", "deposit", &tx)
            .await;
        Ok(receipt(tx))
    }

    /// Debit the caller's wallet
    #[instrument(skip(self, principal, request), fields(actor = %principal.actor_id, amount = %request.amount))]
    pub async fn withdraw(
        &self,
        principal: &Principal,
        request: &WithdrawRequest,
    ) -> Result<OperationReceipt, AppError> {
        authenticate(principal)?;
        self.throttle(principal)?;
        let currency = request.check()?;
        let actor = principal.actor_id;
        let amount = request.amount;

        let tx = self
            .with_retry("withdraw", move || self.try_withdraw(actor, amount, currency.clone()))
            .await?;
        info!(id = %tx.id, flagged = tx.flagged, "Withdrawal committed");

        self.alert_if_flagged(
            &principal.email,
            "Suspicious Withdrawal Alert",
            "withdrawal",
            &tx,
        )
        .await;
        Ok(receipt(tx))
    }

    /// Move funds from the caller to another actor
    #[instrument(skip(self, principal, request), fields(actor = %principal.actor_id, to = %request.to, amount = %request.amount))]
    pub async fn transfer(
        &self,
        principal: &Principal,
        request: &TransferRequest,
    ) -> Result<OperationReceipt, AppError> {
        authenticate(principal)?;
        self.throttle(principal)?;
        let (currency, recipient) = request.check()?;
        let source = principal.actor_id;
        let amount = request.amount;

        let destination = self.resolve_recipient(source, &recipient).await?;
        let tx = self
            .with_retry("transfer", move || {
                self.try_transfer(source, destination, amount, currency.clone())
            })
            .await?;
        info!(id = %tx.id, to = %destination, flagged = tx.flagged, "Transfer committed");

        self.alert_if_flagged(&principal.email, "Suspicious Transfer Alert", "transfer", &tx)
            .await;
        Ok(receipt(tx))
    }

    /// Balances of the caller's wallet
    #[instrument(skip(self, principal), fields(actor = %principal.actor_id))]
    pub async fn get_balances(
        &self,
        principal: &Principal,
    ) -> Result<BTreeMap<Currency, Decimal>, AppError> {
        authenticate(principal)?;
        let wallet = self
            .db_client
            .get_wallet(principal.actor_id)
            .await?
            .ok_or(AppError::Ledger(LedgerError::WalletNotFound(
                principal.actor_id,
            )))?;
        Ok(wallet.balances)
    }

    /// Caller's transactions, newest first
    #[instrument(skip(self, principal, params), fields(actor = %principal.actor_id, limit = params.limit))]
    pub async fn get_history(
        &self,
        principal: &Principal,
        params: &HistoryParams,
    ) -> Result<Vec<Transaction>, AppError> {
        authenticate(principal)?;
        params.validate().map_err(|_| {
            AppError::Validation(ValidationError::InvalidField {
                field: "limit".to_string(),
                message: "Limit must be between 1 and 500".to_string(),
            })
        })?;
        if let (Some(since), Some(until)) = (params.since, params.until)
            && since >= until
        {
            return Err(AppError::Validation(ValidationError::InvalidField {
                field: "since".to_string(),
                message: "Range start must precede its end".to_string(),
            }));
        }

        let mut filter = TransactionFilter::new()
            .involving(principal.actor_id)
            .sort(SortOrder::NewestFirst)
            .limit(params.limit);
        if let Some(since) = params.since {
            filter = filter.created_after(since);
        }
        if let Some(until) = params.until {
            filter = filter.created_before(until);
        }
        self.db_client.query_transactions(&filter).await
    }

    /// Soft-delete a record the caller took part in (admins may delete any)
    #[instrument(skip(self, principal), fields(actor = %principal.actor_id))]
    pub async fn soft_delete_transaction(
        &self,
        principal: &Principal,
        id: TransactionId,
    ) -> Result<(), AppError> {
        authenticate(principal)?;
        let tx = self
            .db_client
            .get_transaction(id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;

        if !principal.is_admin && !tx.involves(principal.actor_id) {
            warn!(id = %id, "Soft delete refused: caller is not a party to the transaction");
            return Err(AppError::Authorization(
                "Only a party to the transaction or an admin may delete it".to_string(),
            ));
        }

        self.db_client.soft_delete_transaction(id).await?;
        info!(id = %id, "Transaction soft-deleted");
        Ok(())
    }

    /// Non-deleted flagged transactions, newest first
    #[instrument(skip(self, principal), fields(actor = %principal.actor_id))]
    pub async fn list_flagged(&self, principal: &Principal) -> Result<Vec<Transaction>, AppError> {
        require_admin(principal)?;
        self.db_client
            .query_transactions(
                &TransactionFilter::new()
                    .flagged(true)
                    .sort(SortOrder::NewestFirst),
            )
            .await
    }

    /// Per-currency totals over all non-deleted wallets
    #[instrument(skip(self, principal), fields(actor = %principal.actor_id))]
    pub async fn aggregate_balances(
        &self,
        principal: &Principal,
    ) -> Result<BTreeMap<Currency, Decimal>, AppError> {
        require_admin(principal)?;
        let mut totals: BTreeMap<Currency, Decimal> = BTreeMap::new();
        for wallet in self.db_client.list_wallets().await? {
            for (currency, amount) in wallet.balances {
                let total = totals.entry(currency.clone()).or_default();
                *total = total.checked_add(amount).ok_or_else(|| {
                    AppError::Ledger(LedgerError::TotalOverflow(format!(
                        "{} across all wallets",
                        currency
                    )))
                })?;
            }
        }
        Ok(totals)
    }

    /// Wallets with the largest unit-for-unit balance sum
    #[instrument(skip(self, principal), fields(actor = %principal.actor_id))]
    pub async fn top_balances(
        &self,
        principal: &Principal,
        limit: Option<usize>,
    ) -> Result<Vec<BalanceRanking>, AppError> {
        require_admin(principal)?;
        let limit = limit.unwrap_or(DEFAULT_TOP_BALANCES);

        let mut ranking = Vec::new();
        for wallet in self.db_client.list_wallets().await? {
            match self.db_client.get_actor(wallet.owner).await? {
                Some(owner) if owner.is_active() => {
                    let total = wallet.total().ok_or_else(|| {
                        AppError::Ledger(LedgerError::TotalOverflow(format!(
                            "wallet of actor {}",
                            owner.id
                        )))
                    })?;
                    ranking.push(BalanceRanking {
                        actor_id: owner.id,
                        email: owner.email,
                        total,
                    });
                }
                _ => debug!(owner = %wallet.owner, "Skipping wallet without an active owner"),
            }
        }
        ranking.sort_by(|a, b| b.total.cmp(&a.total).then(a.actor_id.cmp(&b.actor_id)));
        ranking.truncate(limit);
        Ok(ranking)
    }

    /// Store connectivity
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthStatus {
        match self.db_client.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = %e, "Store health check failed");
                HealthStatus::Unhealthy
            }
        }
    }

    fn throttle(&self, principal: &Principal) -> Result<(), AppError> {
        match &self.rate_limiter {
            Some(limiter) => limiter.check(principal.actor_id),
            None => Ok(()),
        }
    }

    async fn resolve_recipient(
        &self,
        source: ActorId,
        recipient: &Recipient,
    ) -> Result<ActorId, AppError> {
        if *recipient == Recipient::Id(source) {
            return Err(AppError::Ledger(LedgerError::SelfTransfer));
        }
        let actor = match recipient {
            Recipient::Id(id) => self.db_client.get_actor(*id).await?,
            Recipient::Email(email) => self.db_client.find_actor_by_email(email).await?,
        };
        let actor = actor
            .filter(Actor::is_active)
            .ok_or_else(|| AppError::Ledger(LedgerError::ActorNotFound(recipient.to_string())))?;
        if actor.id == source {
            return Err(AppError::Ledger(LedgerError::SelfTransfer));
        }
        Ok(actor.id)
    }

    /// Replay `operation` while it fails with a transient store error
    async fn with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        mut attempt_fn: F,
    ) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut attempt = 1;
        loop {
            match attempt_fn().await {
                Err(e) if e.is_transient() && attempt < self.config.max_commit_attempts => {
                    let delay =
                        with_jitter(calculate_backoff(self.config.retry_base_delay, attempt));
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient store error, replaying operation"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn try_deposit(
        &self,
        actor: ActorId,
        amount: Decimal,
        currency: Currency,
    ) -> Result<Transaction, AppError> {
        let mut unit = self.db_client.begin(&[actor]).await?;
        unit.adjust(actor, &currency, amount).await?;

        let check = FraudCheck::new(actor, TransactionKind::Deposit, amount, currency.clone());
        let outcome = self.evaluator.evaluate(&check, unit.as_reader()).await?;

        let tx = unit
            .append(NewTransaction {
                kind: TransactionKind::Deposit,
                source: None,
                destination: Some(actor),
                amount,
                currency,
                outcome,
            })
            .await?;
        unit.commit().await?;
        Ok(tx)
    }

    async fn try_withdraw(
        &self,
        actor: ActorId,
        amount: Decimal,
        currency: Currency,
    ) -> Result<Transaction, AppError> {
        let mut unit = self.db_client.begin(&[actor]).await?;
        unit.adjust(actor, &currency, -amount).await?;

        let check = FraudCheck::new(actor, TransactionKind::Withdraw, amount, currency.clone());
        let outcome = self.evaluator.evaluate(&check, unit.as_reader()).await?;

        let tx = unit
            .append(NewTransaction {
                kind: TransactionKind::Withdraw,
                source: Some(actor),
                destination: None,
                amount,
                currency,
                outcome,
            })
            .await?;
        unit.commit().await?;
        Ok(tx)
    }

    async fn try_transfer(
        &self,
        source: ActorId,
        destination: ActorId,
        amount: Decimal,
        currency: Currency,
    ) -> Result<Transaction, AppError> {
        let mut unit = self.db_client.begin(&[source, destination]).await?;
        unit.adjust(source, &currency, -amount).await?;
        unit.adjust(destination, &currency, amount).await?;

        let check = FraudCheck::new(source, TransactionKind::Transfer, amount, currency.clone());
        let outcome = self.evaluator.evaluate(&check, unit.as_reader()).await?;

        let tx = unit
            .append(NewTransaction {
                kind: TransactionKind::Transfer,
                source: Some(source),
                destination: Some(destination),
                amount,
                currency,
                outcome,
            })
            .await?;
        unit.commit().await?;
        Ok(tx)
    }

    async fn alert_if_flagged(&self, to: &str, subject: &str, noun: &str, tx: &Transaction) {
        let Some(reason) = tx.reason().filter(|_| tx.flagged) else {
            return;
        };
        let body = format!(
            "Your {} of {} {} was flagged: {}",
            noun, tx.amount, tx.currency, reason
        );
        if let Err(e) = self.notifier.notify(to, subject, &body).await {
            warn!(id = %tx.id, error = %e, "Failed to deliver fraud alert");
        }
    }
}

fn authenticate(principal: &Principal) -> Result<(), AppError> {
    if principal.is_deleted {
        warn!(actor = %principal.actor_id, "Rejected request from deleted actor");
        return Err(AppError::Authentication("Account is deleted".to_string()));
    }
    Ok(())
}

fn require_admin(principal: &Principal) -> Result<(), AppError> {
    authenticate(principal)?;
    if !principal.is_admin {
        warn!(actor = %principal.actor_id, "Admin operation refused");
        return Err(AppError::Authorization("Admin access required".to_string()));
    }
    Ok(())
}

fn receipt(transaction: Transaction) -> OperationReceipt {
    let fraud_reason = transaction
        .flagged
        .then(|| transaction.reason().map(str::to_string))
        .flatten();
    OperationReceipt {
        transaction,
        fraud_reason,
    }
}

/// Exponential backoff with maximum cap
fn calculate_backoff(base: Duration, attempt: u32) -> Duration {
    let factor = 2_u32.pow(attempt.saturating_sub(1).min(8));
    (base * factor).min(Duration::from_millis(MAX_BACKOFF_MS))
}

/// Spread replays of colliding operations apart (±30%)
fn with_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    delay.mul_f64(rng.gen_range(0.7..1.3))
}
