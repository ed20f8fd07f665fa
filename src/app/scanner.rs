//! Periodic fraud scan over committed transaction history.
//!
//! The scanner runs as an independently managed task. Each run selects the
//! records matching the batch rules and flags them one by one; a failure on
//! one record is counted and the run moves on. Flagging is idempotent, so a
//! run interrupted halfway is safe to repeat.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{env_flag, env_or};
use crate::domain::{
    AppError, ConfigError, DatabaseClient, FlagOutcome, LedgerError, Notifier, ScanError,
    SortOrder, Transaction, TransactionFilter, TransactionKind,
};

pub const SCAN_ALERT_SUBJECT: &str = "Suspicious Transaction Alert";

/// Batch rule: a record kind plus a strict amount threshold
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRule {
    pub name: String,
    pub kind: TransactionKind,
    /// Records with an amount strictly above this value match
    pub min_amount_exclusive: Decimal,
    /// Reason written to records flagged by this rule
    pub reason: String,
}

impl ScanRule {
    #[must_use]
    pub fn large_withdrawal(threshold: Decimal) -> Self {
        Self {
            name: "large_withdrawal".to_string(),
            kind: TransactionKind::Withdraw,
            min_amount_exclusive: threshold,
            reason: "Large withdrawal".to_string(),
        }
    }

    /// Non-deleted, not yet flagged records matching this rule
    pub fn filter(&self) -> TransactionFilter {
        TransactionFilter::new()
            .kind(self.kind)
            .amount_above(self.min_amount_exclusive)
            .flagged(false)
            .sort(SortOrder::OldestFirst)
    }
}

/// Scanner configuration
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Time between two runs
    pub interval: Duration,
    pub enabled: bool,
    pub rules: Vec<ScanRule>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            enabled: true,
            rules: vec![ScanRule::large_withdrawal(Decimal::from(1000))],
        }
    }
}

impl ScannerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let interval_secs: u64 = env_or("FRAUD_SCAN_INTERVAL_SECS", 24 * 60 * 60)?;
        if interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "FRAUD_SCAN_INTERVAL_SECS".to_string(),
                value: "0".to_string(),
            });
        }
        let threshold: Decimal = env_or("FRAUD_SCAN_THRESHOLD", Decimal::from(1000))?;
        Ok(Self {
            interval: Duration::from_secs(interval_secs),
            enabled: env_flag("ENABLE_FRAUD_SCANNER", true)?,
            rules: vec![ScanRule::large_withdrawal(threshold)],
        })
    }
}

/// Counters for one scan run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Records selected by the batch rules
    pub matched: usize,
    /// Records this run moved to flagged
    pub flagged: usize,
    /// Records flagged concurrently before this run reached them
    pub already_flagged: usize,
    /// Records whose transition failed
    pub failed: usize,
}

/// Background fraud scanner
pub struct FraudScanner {
    db_client: Arc<dyn DatabaseClient>,
    notifier: Arc<dyn Notifier>,
    config: ScannerConfig,
    running: AtomicBool,
}

/// Clears the single-flight flag when a run ends, including by cancellation
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl FraudScanner {
    #[must_use]
    pub fn new(
        db_client: Arc<dyn DatabaseClient>,
        notifier: Arc<dyn Notifier>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            db_client,
            notifier,
            config,
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Whether a run is in flight
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Execute one scan run.
    ///
    /// Returns [`ScanError::AlreadyRunning`] without touching the store when
    /// another run is in flight.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<ScanReport, ScanError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Fraud scan skipped: previous run still in flight");
            return Err(ScanError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.running);

        let mut report = ScanReport::default();
        let mut seen = HashSet::new();

        for rule in &self.config.rules {
            let candidates = self.db_client.query_transactions(&rule.filter()).await?;
            debug!(rule = %rule.name, candidates = candidates.len(), "Scan rule evaluated");

            for tx in candidates {
                if !seen.insert(tx.id) {
                    continue;
                }
                report.matched += 1;
                match self.db_client.mark_flagged(tx.id, &rule.reason).await {
                    Ok(FlagOutcome::Flagged) => {
                        report.flagged += 1;
                        self.alert_owner(&tx).await;
                    }
                    Ok(FlagOutcome::AlreadyFlagged) => report.already_flagged += 1,
                    Err(e) => {
                        report.failed += 1;
                        error!(id = %tx.id, error = %e, "Failed to flag transaction");
                    }
                }
            }
        }

        info!(
            matched = report.matched,
            flagged = report.flagged,
            already_flagged = report.already_flagged,
            failed = report.failed,
            "Fraud scan complete"
        );
        Ok(report)
    }

    /// Start the periodic loop; the first run happens one interval from now
    pub fn spawn(self: Arc<Self>) -> ScannerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = self.config.interval;
        let scanner = self;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = period.as_secs(), "Fraud scanner started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match scanner.run_once().await {
                            Ok(_) | Err(ScanError::AlreadyRunning) => {}
                            Err(e) => error!(error = %e, "Fraud scan run failed"),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Fraud scanner stopped");
        });

        ScannerHandle {
            handle,
            shutdown_tx,
        }
    }

    async fn alert_owner(&self, tx: &Transaction) {
        let Some(owner) = tx.contact_actor() else {
            return;
        };
        let actor = match self.db_client.get_actor(owner).await {
            Ok(actor) => actor.filter(|actor| actor.is_active()),
            Err(e) => {
                warn!(id = %tx.id, error = %e, "Could not resolve transaction owner");
                return;
            }
        };
        let Some(actor) = actor else {
            let err = AppError::Ledger(LedgerError::ActorNotFound(owner.to_string()));
            warn!(id = %tx.id, error = %err, "Skipping scan alert");
            return;
        };

        let body = format!(
            "Transaction {} flagged as suspicious in daily scan.",
            tx.id
        );
        if let Err(e) = self
            .notifier
            .notify(&actor.email, SCAN_ALERT_SUBJECT, &body)
            .await
        {
            warn!(id = %tx.id, error = %e, "Failed to deliver scan alert");
        }
    }
}

/// Running scanner task
pub struct ScannerHandle {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl ScannerHandle {
    /// Whether the background loop is still alive
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal shutdown and wait for the loop to exit.
    ///
    /// A run in flight finishes its current record loop before the task ends.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "Fraud scanner task panicked");
        }
    }
}
