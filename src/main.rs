//! Application entry point.

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use wallet_ledger::app::{AppState, FraudEvaluator, FraudRulesConfig, ScannerConfig, ServiceConfig};
use wallet_ledger::config::env_flag;
use wallet_ledger::infra::{
    InMemoryDatabase, LogNotifier, RateLimitConfig, SlidingWindowLimiter, eviction_task,
};

/// Application configuration
struct Config {
    enable_rate_limiting: bool,
    rate_limit_config: RateLimitConfig,
    fraud_rules: FraudRulesConfig,
    scanner_config: ScannerConfig,
    service_config: ServiceConfig,
    /// Sender address shown on alert emails
    alert_sender: Option<String>,
}

impl Config {
    fn from_env() -> Result<Self> {
        let enable_rate_limiting = env_flag("ENABLE_RATE_LIMITING", true)
            .context("Failed to read ENABLE_RATE_LIMITING")?;
        let rate_limit_config =
            RateLimitConfig::from_env().context("Invalid rate limit configuration")?;
        let fraud_rules = FraudRulesConfig::from_env().context("Invalid fraud rule thresholds")?;
        let scanner_config =
            ScannerConfig::from_env().context("Invalid fraud scanner configuration")?;
        let service_config = ServiceConfig::from_env().context("Invalid service configuration")?;
        let alert_sender = env::var("ALERT_SENDER").ok().filter(|s| !s.is_empty());

        Ok(Self {
            enable_rate_limiting,
            rate_limit_config,
            fraud_rules,
            scanner_config,
            service_config,
            alert_sender,
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,wallet_ledger=debug"));
    let json = env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!("Wallet Ledger v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    info!("Initializing infrastructure...");

    let db_client = Arc::new(InMemoryDatabase::with_defaults());
    info!("   ✓ In-memory store ready");

    let notifier = match &config.alert_sender {
        Some(sender) => LogNotifier::new().with_sender(sender.clone()),
        None => LogNotifier::new(),
    };
    let notifier = Arc::new(notifier);
    info!("   ✓ Notifier ready (log delivery)");

    let rate_limiter = config
        .enable_rate_limiting
        .then(|| Arc::new(SlidingWindowLimiter::new(config.rate_limit_config.clone())));

    let mut app_state = AppState::with_config(
        db_client.clone(),
        notifier.clone(),
        FraudEvaluator::new(&config.fraud_rules),
        config.service_config.clone(),
        config.scanner_config.clone(),
        rate_limiter.clone(),
    );
    info!(
        "   ✓ Fraud rules: velocity > {} transfers / {}s, withdrawal > {}",
        config.fraud_rules.velocity_max_transfers,
        config.fraud_rules.velocity_window_secs,
        config.fraud_rules.large_withdrawal
    );

    let eviction_handle = match rate_limiter {
        Some(limiter) => {
            let window = config.rate_limit_config.window;
            info!(
                "   ✓ Rate limiting enabled ({} requests / {}s)",
                config.rate_limit_config.max_requests,
                window.as_secs()
            );
            Some(tokio::spawn(eviction_task(limiter, window)))
        }
        None => {
            info!("   ○ Rate limiting disabled");
            None
        }
    };

    if app_state.start_scanner() {
        info!(
            "   ✓ Fraud scanner started (every {}s)",
            config.scanner_config.interval.as_secs()
        );
    } else {
        info!("   ○ Fraud scanner disabled");
    }

    let health = app_state.health_check().await;
    info!(status = ?health.status, "Ledger ready");

    shutdown_signal().await;

    app_state.shutdown().await;
    if let Some(handle) = eviction_handle {
        handle.abort();
    }

    info!("Shutdown complete");
    Ok(())
}
