//! Application layer containing business logic and shared state.

pub mod fraud;
pub mod scanner;
pub mod service;
pub mod state;

pub use fraud::{
    FraudCheck, FraudEvaluator, FraudRule, FraudRulesConfig, LargeWithdrawalRule, VelocityRule,
};
pub use scanner::{FraudScanner, ScanReport, ScanRule, ScannerConfig, ScannerHandle};
pub use service::{LedgerService, ServiceConfig};
pub use state::AppState;
