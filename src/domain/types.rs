//! Domain types with validation support.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::Validate;

use super::error::ValidationError;

/// Actor (user) identifier issued by the identity provider
pub type ActorId = Uuid;

/// Transaction identifier (UUID v7, time-ordered)
pub type TransactionId = Uuid;

/// Metadata key holding the fraud reason of a flagged transaction
pub const METADATA_REASON: &str = "reason";

/// Metadata key holding the time a transaction was flagged after creation
pub const METADATA_FLAGGED_AT: &str = "flagged_at";

/// ISO-4217 style currency code, always three upper-case ASCII letters
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Currency {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(code.to_ascii_uppercase()))
        } else {
            Err(ValidationError::InvalidCurrency(s.to_string()))
        }
    }
}

impl TryFrom<String> for Currency {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of monetary movement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
    Transfer,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdraw => "withdraw",
            Self::Transfer => "transfer",
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(Self::Deposit),
            "withdraw" => Ok(Self::Withdraw),
            "transfer" => Ok(Self::Transfer),
            _ => Err(format!("Invalid transaction kind: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a transaction record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Not yet settled (reserved; the engine records settled movements only)
    Pending,
    /// Settled and not suspicious
    #[default]
    Completed,
    /// Settled and matched a fraud rule. Terminal.
    Flagged,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Flagged => "flagged",
        }
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "flagged" => Ok(Self::Flagged),
            _ => Err(format!("Invalid transaction status: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Registered actor as known to the ledger's directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
    /// Contact address, also used to address transfers
    pub email: String,
    pub is_admin: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Actor {
    pub fn is_active(&self) -> bool {
        !self.is_deleted
    }
}

/// Registration payload; creates an actor and its wallet together
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewActor {
    #[validate(length(min = 1, max = 255, message = "Name is required"))]
    pub name: String,
    #[validate(email(message = "Email must be a valid address"))]
    pub email: String,
    #[serde(default)]
    pub is_admin: bool,
}

impl NewActor {
    #[must_use]
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            is_admin: false,
        }
    }

    #[must_use]
    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }
}

/// Verified caller identity handed over by the identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub actor_id: ActorId,
    pub email: String,
    pub is_admin: bool,
    pub is_deleted: bool,
}

impl From<&Actor> for Principal {
    fn from(actor: &Actor) -> Self {
        Self {
            actor_id: actor.id,
            email: actor.email.clone(),
            is_admin: actor.is_admin,
            is_deleted: actor.is_deleted,
        }
    }
}

/// Multi-currency wallet; exactly one per actor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Wallet {
    pub owner: ActorId,
    pub balances: BTreeMap<Currency, Decimal>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    #[must_use]
    pub fn new(owner: ActorId) -> Self {
        let now = Utc::now();
        Self {
            owner,
            balances: BTreeMap::new(),
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Balance for `currency`, zero when the currency was never touched
    pub fn balance(&self, currency: &Currency) -> Decimal {
        self.balances.get(currency).copied().unwrap_or_default()
    }

    /// Unit-for-unit sum across currencies (no conversion), `None` on overflow
    pub fn total(&self) -> Option<Decimal> {
        self.balances
            .values()
            .try_fold(Decimal::ZERO, |sum, amount| sum.checked_add(*amount))
    }
}

/// Immutable record of one monetary movement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: TransactionId,
    pub kind: TransactionKind,
    pub source: Option<ActorId>,
    pub destination: Option<ActorId>,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: TransactionStatus,
    pub flagged: bool,
    pub metadata: Map<String, Value>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Materialize a staged record at `created_at`
    #[must_use]
    pub fn from_new(record: NewTransaction, created_at: DateTime<Utc>) -> Self {
        let mut metadata = Map::new();
        if let Some(reason) = &record.outcome.reason {
            metadata.insert(METADATA_REASON.to_string(), Value::String(reason.clone()));
        }
        let status = if record.outcome.flagged {
            TransactionStatus::Flagged
        } else {
            TransactionStatus::Completed
        };
        Self {
            id: Uuid::now_v7(),
            kind: record.kind,
            source: record.source,
            destination: record.destination,
            amount: record.amount,
            currency: record.currency,
            status,
            flagged: record.outcome.flagged,
            metadata,
            is_deleted: false,
            deleted_at: None,
            created_at,
        }
    }

    /// Fraud reason recorded in metadata, if any
    pub fn reason(&self) -> Option<&str> {
        self.metadata.get(METADATA_REASON).and_then(Value::as_str)
    }

    /// Whether `actor` is the source or the destination
    pub fn involves(&self, actor: ActorId) -> bool {
        self.source == Some(actor) || self.destination == Some(actor)
    }

    /// Actor to alert about this record: source first, destination otherwise
    pub fn contact_actor(&self) -> Option<ActorId> {
        self.source.or(self.destination)
    }
}

/// Record staged for append inside a unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    pub source: Option<ActorId>,
    pub destination: Option<ActorId>,
    pub amount: Decimal,
    pub currency: Currency,
    pub outcome: FraudOutcome,
}

/// Result of a fraud evaluation; folded into the record at creation time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FraudOutcome {
    pub flagged: bool,
    pub reason: Option<String>,
}

impl FraudOutcome {
    #[must_use]
    pub fn clear() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn flagged(reason: impl Into<String>) -> Self {
        Self {
            flagged: true,
            reason: Some(reason.into()),
        }
    }
}

/// Result of a flag transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOutcome {
    /// The record moved from completed to flagged
    Flagged,
    /// The record was already flagged; nothing changed
    AlreadyFlagged,
}

/// Sort direction for transaction queries (by creation time)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Explicit transaction query predicate.
///
/// Soft-deleted records are excluded unless `include_deleted` is set; every
/// store implementation filters through [`TransactionFilter::matches`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionFilter {
    /// Matches records where the actor is source or destination
    pub actor: Option<ActorId>,
    /// Matches records with this source only
    pub source: Option<ActorId>,
    pub kind: Option<TransactionKind>,
    pub status: Option<TransactionStatus>,
    pub flagged: Option<bool>,
    /// Strictly greater than this amount
    pub amount_above: Option<Decimal>,
    /// Inclusive lower bound
    pub created_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub created_before: Option<DateTime<Utc>>,
    pub include_deleted: bool,
    pub sort: SortOrder,
    pub limit: Option<usize>,
}

impl TransactionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn involving(mut self, actor: ActorId) -> Self {
        self.actor = Some(actor);
        self
    }

    #[must_use]
    pub fn from_source(mut self, actor: ActorId) -> Self {
        self.source = Some(actor);
        self
    }

    #[must_use]
    pub fn kind(mut self, kind: TransactionKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn status(mut self, status: TransactionStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn flagged(mut self, flagged: bool) -> Self {
        self.flagged = Some(flagged);
        self
    }

    #[must_use]
    pub fn amount_above(mut self, amount: Decimal) -> Self {
        self.amount_above = Some(amount);
        self
    }

    #[must_use]
    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.created_after = Some(at);
        self
    }

    #[must_use]
    pub fn created_before(mut self, at: DateTime<Utc>) -> Self {
        self.created_before = Some(at);
        self
    }

    #[must_use]
    pub fn with_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    #[must_use]
    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a record satisfies every populated criterion
    pub fn matches(&self, tx: &Transaction) -> bool {
        if tx.is_deleted && !self.include_deleted {
            return false;
        }
        if let Some(actor) = self.actor
            && !tx.involves(actor)
        {
            return false;
        }
        if self.source.is_some() && tx.source != self.source {
            return false;
        }
        if self.kind.is_some_and(|kind| tx.kind != kind) {
            return false;
        }
        if self.status.is_some_and(|status| tx.status != status) {
            return false;
        }
        if self.flagged.is_some_and(|flagged| tx.flagged != flagged) {
            return false;
        }
        if self.amount_above.is_some_and(|min| tx.amount <= min) {
            return false;
        }
        if self.created_after.is_some_and(|after| tx.created_at < after) {
            return false;
        }
        if self.created_before.is_some_and(|before| tx.created_at >= before) {
            return false;
        }
        true
    }

    /// Filter, sort and truncate a set of records
    pub fn apply<'a>(&self, records: impl IntoIterator<Item = &'a Transaction>) -> Vec<Transaction> {
        let mut items: Vec<Transaction> = records
            .into_iter()
            .filter(|tx| self.matches(tx))
            .cloned()
            .collect();
        match self.sort {
            SortOrder::NewestFirst => {
                items.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)))
            }
            SortOrder::OldestFirst => {
                items.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)))
            }
        }
        if let Some(limit) = self.limit {
            items.truncate(limit);
        }
        items
    }
}

/// Transfer destination as supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Id(ActorId),
    Email(String),
}

impl Recipient {
    /// Interpret a UUID as an actor id, anything else as an email address
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        match Uuid::parse_str(value) {
            Ok(id) => Self::Id(id),
            Err(_) => Self::Email(value.to_ascii_lowercase()),
        }
    }
}

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::Email(email) => f.write_str(email),
        }
    }
}

fn validate_positive_amount(amount: &Decimal) -> Result<(), validator::ValidationError> {
    if amount.is_sign_positive() && !amount.is_zero() {
        Ok(())
    } else {
        Err(validator::ValidationError::new("positive_amount"))
    }
}

fn validate_currency_code(code: &str) -> Result<(), validator::ValidationError> {
    code.parse::<Currency>()
        .map(|_| ())
        .map_err(|_| validator::ValidationError::new("currency_code"))
}

/// Map `validator` output to the ledger's validation taxonomy
fn map_validation_errors(
    errors: validator::ValidationErrors,
    amount: &Decimal,
    currency: &str,
) -> ValidationError {
    let fields = errors.field_errors();
    if fields.contains_key("amount") {
        ValidationError::InvalidAmount(amount.to_string())
    } else if fields.contains_key("currency") {
        ValidationError::InvalidCurrency(currency.to_string())
    } else {
        ValidationError::Multiple(errors.to_string())
    }
}

/// Request to credit the caller's wallet
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DepositRequest {
    #[validate(custom(function = "validate_positive_amount"))]
    pub amount: Decimal,
    #[validate(custom(function = "validate_currency_code"))]
    pub currency: String,
}

impl DepositRequest {
    #[must_use]
    pub fn new(amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    /// Validate and return the parsed currency
    pub fn check(&self) -> Result<Currency, ValidationError> {
        self.validate()
            .map_err(|e| map_validation_errors(e, &self.amount, &self.currency))?;
        self.currency.parse()
    }
}

/// Request to debit the caller's wallet
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WithdrawRequest {
    #[validate(custom(function = "validate_positive_amount"))]
    pub amount: Decimal,
    #[validate(custom(function = "validate_currency_code"))]
    pub currency: String,
}

impl WithdrawRequest {
    #[must_use]
    pub fn new(amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    /// Validate and return the parsed currency
    pub fn check(&self) -> Result<Currency, ValidationError> {
        self.validate()
            .map_err(|e| map_validation_errors(e, &self.amount, &self.currency))?;
        self.currency.parse()
    }
}

/// Request to move funds from the caller to another actor
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TransferRequest {
    /// Recipient email address or actor id
    #[validate(length(min = 1, message = "Recipient is required"))]
    pub to: String,
    #[validate(custom(function = "validate_positive_amount"))]
    pub amount: Decimal,
    #[validate(custom(function = "validate_currency_code"))]
    pub currency: String,
}

impl TransferRequest {
    #[must_use]
    pub fn new(to: impl Into<String>, amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            amount,
            currency: currency.into(),
        }
    }

    /// Validate and return the parsed currency and recipient
    pub fn check(&self) -> Result<(Currency, Recipient), ValidationError> {
        self.validate().map_err(|e| {
            if e.field_errors().contains_key("to") {
                ValidationError::MissingField("to".to_string())
            } else {
                map_validation_errors(e, &self.amount, &self.currency)
            }
        })?;
        Ok((self.currency.parse()?, Recipient::parse(&self.to)))
    }
}

/// History query parameters
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HistoryParams {
    /// Maximum number of records to return (1-500, default: 100)
    #[validate(range(min = 1, max = 500, message = "Limit must be between 1 and 500"))]
    #[serde(default = "default_history_limit")]
    pub limit: usize,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

fn default_history_limit() -> usize {
    100
}

impl Default for HistoryParams {
    fn default() -> Self {
        Self {
            limit: default_history_limit(),
            since: None,
            until: None,
        }
    }
}

/// Outcome of a committed mutation
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OperationReceipt {
    pub transaction: Transaction,
    /// Fraud reason when the record was flagged at creation
    pub fraud_reason: Option<String>,
}

impl OperationReceipt {
    pub fn is_flagged(&self) -> bool {
        self.transaction.flagged
    }
}

/// Entry of the top-balances report
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BalanceRanking {
    pub actor_id: ActorId,
    pub email: String,
    /// Unit-for-unit sum of all balances
    pub total: Decimal,
}

/// Component health
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Ledger operational but background screening is not running
    Degraded,
    /// Store unavailable
    Unhealthy,
}

/// Health report for the ledger and its background scanner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub database: HealthStatus,
    pub fraud_scanner: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl HealthResponse {
    #[must_use]
    pub fn new(database: HealthStatus, fraud_scanner: HealthStatus) -> Self {
        let status = match (database, fraud_scanner) {
            (HealthStatus::Unhealthy, _) => HealthStatus::Unhealthy,
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            _ => HealthStatus::Degraded,
        };
        Self {
            status,
            database,
            fraud_scanner,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
