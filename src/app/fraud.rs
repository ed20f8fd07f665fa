//! Synchronous fraud rules evaluated inside the unit of work.
//!
//! Rules run in order and the first match wins. Each rule reads history
//! through the [`TransactionReader`] it is handed, which during an operation is
//! the open unit itself: counts include records staged by the unit and are
//! taken while the unit holds the actor's wallet lock.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::config::env_or;
use crate::domain::{
    ActorId, AppError, ConfigError, Currency, FraudOutcome, TransactionFilter, TransactionKind,
    TransactionReader,
};

pub const VELOCITY_REASON: &str = "Too many transfers in a short period";
pub const LARGE_WITHDRAWAL_REASON: &str = "Large withdrawal";

/// Longest accepted velocity window (30 days)
pub const MAX_VELOCITY_WINDOW_SECS: i64 = 30 * 24 * 60 * 60;

/// Thresholds for the built-in rules
#[derive(Debug, Clone)]
pub struct FraudRulesConfig {
    /// Trailing window for the velocity rule, in seconds
    pub velocity_window_secs: i64,
    /// Transfers allowed inside the window; one more is flagged
    pub velocity_max_transfers: usize,
    /// Withdrawals strictly above this amount are flagged
    pub large_withdrawal: Decimal,
}

impl Default for FraudRulesConfig {
    fn default() -> Self {
        Self {
            velocity_window_secs: 60,
            velocity_max_transfers: 3,
            large_withdrawal: Decimal::from(1000),
        }
    }
}

impl FraudRulesConfig {
    /// Load thresholds from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            velocity_window_secs: env_or(
                "FRAUD_VELOCITY_WINDOW_SECS",
                defaults.velocity_window_secs,
            )?,
            velocity_max_transfers: env_or(
                "FRAUD_VELOCITY_MAX_TRANSFERS",
                defaults.velocity_max_transfers,
            )?,
            large_withdrawal: env_or("FRAUD_LARGE_WITHDRAWAL", defaults.large_withdrawal)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_VELOCITY_WINDOW_SECS).contains(&self.velocity_window_secs) {
            return Err(ConfigError::InvalidValue {
                name: "FRAUD_VELOCITY_WINDOW_SECS".to_string(),
                value: self.velocity_window_secs.to_string(),
            });
        }
        if self.large_withdrawal.is_sign_negative() {
            return Err(ConfigError::InvalidValue {
                name: "FRAUD_LARGE_WITHDRAWAL".to_string(),
                value: self.large_withdrawal.to_string(),
            });
        }
        Ok(())
    }
}

/// Operation under evaluation
#[derive(Debug, Clone)]
pub struct FraudCheck {
    /// Acting actor (source of transfers and withdrawals, destination of deposits)
    pub actor: ActorId,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub currency: Currency,
    /// Evaluation instant; windows are anchored here
    pub at: DateTime<Utc>,
}

impl FraudCheck {
    #[must_use]
    pub fn new(actor: ActorId, kind: TransactionKind, amount: Decimal, currency: Currency) -> Self {
        Self {
            actor,
            kind,
            amount,
            currency,
            at: Utc::now(),
        }
    }
}

/// A single fraud rule
#[async_trait]
pub trait FraudRule: Send + Sync {
    /// Stable rule name used in logs
    fn name(&self) -> &'static str;

    /// Return the reason when the operation matches
    async fn evaluate(
        &self,
        check: &FraudCheck,
        reader: &dyn TransactionReader,
    ) -> Result<Option<String>, AppError>;
}

/// Flags an actor issuing too many transfers in a short period
pub struct VelocityRule {
    window: Duration,
    max_transfers: usize,
}

impl VelocityRule {
    /// Windows outside `0..=MAX_VELOCITY_WINDOW_SECS` are clamped into range
    #[must_use]
    pub fn new(window_secs: i64, max_transfers: usize) -> Self {
        Self {
            window: Duration::seconds(window_secs.clamp(0, MAX_VELOCITY_WINDOW_SECS)),
            max_transfers,
        }
    }
}

#[async_trait]
impl FraudRule for VelocityRule {
    fn name(&self) -> &'static str {
        "velocity"
    }

    async fn evaluate(
        &self,
        check: &FraudCheck,
        reader: &dyn TransactionReader,
    ) -> Result<Option<String>, AppError> {
        if check.kind != TransactionKind::Transfer {
            return Ok(None);
        }
        let filter = TransactionFilter::new()
            .from_source(check.actor)
            .kind(TransactionKind::Transfer)
            .created_after(check.at - self.window);
        // The transfer being evaluated is not stored yet
        let count = reader.count_transactions(&filter).await? + 1;
        debug!(actor = %check.actor, count, "Velocity window count");

        Ok((count > self.max_transfers).then(|| VELOCITY_REASON.to_string()))
    }
}

/// Flags withdrawals above a fixed amount
pub struct LargeWithdrawalRule {
    threshold: Decimal,
}

impl LargeWithdrawalRule {
    #[must_use]
    pub fn new(threshold: Decimal) -> Self {
        Self { threshold }
    }
}

#[async_trait]
impl FraudRule for LargeWithdrawalRule {
    fn name(&self) -> &'static str {
        "large_withdrawal"
    }

    async fn evaluate(
        &self,
        check: &FraudCheck,
        _reader: &dyn TransactionReader,
    ) -> Result<Option<String>, AppError> {
        let matched = check.kind == TransactionKind::Withdraw && check.amount > self.threshold;
        Ok(matched.then(|| LARGE_WITHDRAWAL_REASON.to_string()))
    }
}

/// Ordered rule set, first match wins
pub struct FraudEvaluator {
    rules: Vec<Box<dyn FraudRule>>,
}

impl FraudEvaluator {
    /// Built-in rules in priority order: velocity, then large withdrawal
    #[must_use]
    pub fn new(config: &FraudRulesConfig) -> Self {
        Self::with_rules(vec![
            Box::new(VelocityRule::new(
                config.velocity_window_secs,
                config.velocity_max_transfers,
            )),
            Box::new(LargeWithdrawalRule::new(config.large_withdrawal)),
        ])
    }

    #[must_use]
    pub fn with_rules(rules: Vec<Box<dyn FraudRule>>) -> Self {
        Self { rules }
    }

    /// Append a rule after the existing ones
    #[must_use]
    pub fn push_rule(mut self, rule: Box<dyn FraudRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    pub async fn evaluate(
        &self,
        check: &FraudCheck,
        reader: &dyn TransactionReader,
    ) -> Result<FraudOutcome, AppError> {
        for rule in &self.rules {
            if let Some(reason) = rule.evaluate(check, reader).await? {
                info!(
                    actor = %check.actor,
                    kind = %check.kind,
                    amount = %check.amount,
                    rule = rule.name(),
                    reason = %reason,
                    "Fraud rule matched"
                );
                return Ok(FraudOutcome::flagged(reason));
            }
        }
        Ok(FraudOutcome::clear())
    }
}

impl Default for FraudEvaluator {
    fn default() -> Self {
        Self::new(&FraudRulesConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Reader that reports a fixed number of matching records
    struct FixedCount(usize);

    #[async_trait]
    impl TransactionReader for FixedCount {
        async fn count_transactions(&self, _filter: &TransactionFilter) -> Result<usize, AppError> {
            Ok(self.0)
        }
    }

    struct FailingReader;

    #[async_trait]
    impl TransactionReader for FailingReader {
        async fn count_transactions(&self, _filter: &TransactionFilter) -> Result<usize, AppError> {
            Err(AppError::Internal("reader unavailable".to_string()))
        }
    }

    fn check(kind: TransactionKind, amount: i64) -> FraudCheck {
        FraudCheck::new(
            Uuid::new_v4(),
            kind,
            Decimal::from(amount),
            "USD".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_fourth_transfer_in_window_is_flagged() {
        let evaluator = FraudEvaluator::default();
        let third = evaluator
            .evaluate(&check(TransactionKind::Transfer, 10), &FixedCount(2))
            .await
            .unwrap();
        assert!(!third.flagged);

        let fourth = evaluator
            .evaluate(&check(TransactionKind::Transfer, 10), &FixedCount(3))
            .await
            .unwrap();
        assert!(fourth.flagged);
        assert_eq!(fourth.reason.as_deref(), Some(VELOCITY_REASON));
    }

    #[tokio::test]
    async fn test_large_withdrawal_boundary() {
        let evaluator = FraudEvaluator::default();
        let at_limit = evaluator
            .evaluate(&check(TransactionKind::Withdraw, 1000), &FixedCount(0))
            .await
            .unwrap();
        assert!(!at_limit.flagged);

        let above = evaluator
            .evaluate(&check(TransactionKind::Withdraw, 1001), &FixedCount(0))
            .await
            .unwrap();
        assert_eq!(above.reason.as_deref(), Some(LARGE_WITHDRAWAL_REASON));

        let deposit = evaluator
            .evaluate(&check(TransactionKind::Deposit, 5000), &FixedCount(0))
            .await
            .unwrap();
        assert!(!deposit.flagged);
    }

    #[tokio::test]
    async fn test_velocity_ignores_non_transfers() {
        let evaluator = FraudEvaluator::default();
        let outcome = evaluator
            .evaluate(&check(TransactionKind::Withdraw, 5), &FixedCount(50))
            .await
            .unwrap();
        assert!(!outcome.flagged);
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        struct Always(&'static str);

        #[async_trait]
        impl FraudRule for Always {
            fn name(&self) -> &'static str {
                self.0
            }

            async fn evaluate(
                &self,
                _check: &FraudCheck,
                _reader: &dyn TransactionReader,
            ) -> Result<Option<String>, AppError> {
                Ok(Some(self.0.to_string()))
            }
        }

        let evaluator = FraudEvaluator::with_rules(vec![Box::new(Always("first"))])
            .push_rule(Box::new(Always("second")));
        assert_eq!(evaluator.rule_names(), vec!["first", "second"]);
        let outcome = evaluator
            .evaluate(&check(TransactionKind::Deposit, 1), &FixedCount(0))
            .await
            .unwrap();
        assert_eq!(outcome.reason.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_reader_failure_propagates() {
        let evaluator = FraudEvaluator::default();
        let result = evaluator
            .evaluate(&check(TransactionKind::Transfer, 1), &FailingReader)
            .await;
        assert!(matches!(result, Err(AppError::Internal(_))));
    }

    #[test]
    fn test_config_rejects_out_of_range_window() {
        for secs in [0, -60, i64::MAX] {
            let config = FraudRulesConfig {
                velocity_window_secs: secs,
                ..FraudRulesConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidValue { name, .. }) if name == "FRAUD_VELOCITY_WINDOW_SECS"
            ));
        }
        assert!(FraudRulesConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_env_rejects_huge_window() {
        unsafe { std::env::set_var("FRAUD_VELOCITY_WINDOW_SECS", "9223372036854775807") };
        let result = FraudRulesConfig::from_env();
        unsafe { std::env::remove_var("FRAUD_VELOCITY_WINDOW_SECS") };
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[tokio::test]
    async fn test_velocity_rule_clamps_huge_window() {
        let rule = VelocityRule::new(i64::MAX, 3);
        let outcome = rule
            .evaluate(&check(TransactionKind::Transfer, 1), &FixedCount(3))
            .await
            .unwrap();
        assert_eq!(outcome.as_deref(), Some(VELOCITY_REASON));
    }

    #[tokio::test]
    async fn test_custom_thresholds() {
        let evaluator = FraudEvaluator::new(&FraudRulesConfig {
            velocity_window_secs: 10,
            velocity_max_transfers: 1,
            large_withdrawal: Decimal::from(50),
        });
        let transfer = evaluator
            .evaluate(&check(TransactionKind::Transfer, 1), &FixedCount(1))
            .await
            .unwrap();
        assert!(transfer.flagged);
        let withdraw = evaluator
            .evaluate(&check(TransactionKind::Withdraw, 51), &FixedCount(0))
            .await
            .unwrap();
        assert!(withdraw.flagged);
    }
}
