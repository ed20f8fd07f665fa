//! Application state management.

use std::sync::Arc;

use crate::domain::{DatabaseClient, HealthResponse, HealthStatus, Notifier};
use crate::infra::SlidingWindowLimiter;

use super::fraud::FraudEvaluator;
use super::scanner::{FraudScanner, ScannerConfig, ScannerHandle};
use super::service::{LedgerService, ServiceConfig};

/// Shared application state
pub struct AppState {
    pub service: Arc<LedgerService>,
    pub db_client: Arc<dyn DatabaseClient>,
    pub notifier: Arc<dyn Notifier>,
    pub scanner: Arc<FraudScanner>,
    /// Per-actor throttle shared with the service (optional)
    pub rate_limiter: Option<Arc<SlidingWindowLimiter>>,
    scanner_handle: Option<ScannerHandle>,
}

impl AppState {
    /// Create a new application state with default rules and settings
    #[must_use]
    pub fn new(db_client: Arc<dyn DatabaseClient>, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_config(
            db_client,
            notifier,
            FraudEvaluator::default(),
            ServiceConfig::default(),
            ScannerConfig::default(),
            None,
        )
    }

    /// Wire the service and scanner. A limiter, when given, throttles the
    /// balance-changing operations
    #[must_use]
    pub fn with_config(
        db_client: Arc<dyn DatabaseClient>,
        notifier: Arc<dyn Notifier>,
        evaluator: FraudEvaluator,
        service_config: ServiceConfig,
        scanner_config: ScannerConfig,
        rate_limiter: Option<Arc<SlidingWindowLimiter>>,
    ) -> Self {
        let mut service = LedgerService::with_config(
            Arc::clone(&db_client),
            Arc::clone(&notifier),
            evaluator,
            service_config,
        );
        if let Some(limiter) = &rate_limiter {
            service = service.with_rate_limiter(Arc::clone(limiter));
        }
        let scanner = Arc::new(FraudScanner::new(
            Arc::clone(&db_client),
            Arc::clone(&notifier),
            scanner_config,
        ));
        Self {
            service: Arc::new(service),
            db_client,
            notifier,
            scanner,
            rate_limiter,
            scanner_handle: None,
        }
    }

    /// Start the periodic fraud scanner if it is enabled and not yet running
    pub fn start_scanner(&mut self) -> bool {
        if self.scanner_handle.is_some() || !self.scanner.config().enabled {
            return false;
        }
        self.scanner_handle = Some(Arc::clone(&self.scanner).spawn());
        true
    }

    /// Stop background tasks
    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.scanner_handle.take() {
            handle.stop().await;
        }
    }

    /// Combined health of the store and the scanner task
    pub async fn health_check(&self) -> HealthResponse {
        let database = self.service.health_check().await;
        let fraud_scanner = match &self.scanner_handle {
            Some(handle) if !handle.is_running() => HealthStatus::Unhealthy,
            None if self.scanner.config().enabled => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        };
        HealthResponse::new(database, fraud_scanner)
    }
}
