//! End-to-end properties of the ledger engine, fraud screening and throttling.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use wallet_ledger::app::{FraudEvaluator, FraudScanner, LedgerService, ScannerConfig, ServiceConfig};
use wallet_ledger::domain::{
    AppError, Currency, DatabaseClient, DatabaseError, DepositRequest, FlagOutcome, HistoryParams,
    LedgerError, NewActor, Principal, ScanError, TransactionFilter, TransactionKind, TransactionStatus,
    TransferRequest, WithdrawRequest,
};
use wallet_ledger::infra::{RateLimitConfig, SlidingWindowLimiter};
use wallet_ledger::test_utils::{MockDatabaseClient, MockNotifier};

struct Harness {
    db: Arc<MockDatabaseClient>,
    notifier: Arc<MockNotifier>,
    service: Arc<LedgerService>,
}

fn fast_retries() -> ServiceConfig {
    ServiceConfig {
        max_commit_attempts: 3,
        retry_base_delay: Duration::from_millis(1),
    }
}

impl Harness {
    fn new() -> Self {
        Self::with_evaluator(FraudEvaluator::default())
    }

    fn with_evaluator(evaluator: FraudEvaluator) -> Self {
        let db = Arc::new(MockDatabaseClient::new());
        let notifier = Arc::new(MockNotifier::new());
        let service = Arc::new(LedgerService::with_config(
            db.clone(),
            notifier.clone(),
            evaluator,
            fast_retries(),
        ));
        Self {
            db,
            notifier,
            service,
        }
    }

    async fn register(&self, name: &str, email: &str) -> Principal {
        let actor = self
            .service
            .register_actor(&NewActor::new(name, email))
            .await
            .unwrap();
        Principal::from(&actor)
    }

    async fn admin(&self) -> Principal {
        let actor = self
            .service
            .register_actor(&NewActor::new("Root", "root@example.com").admin())
            .await
            .unwrap();
        Principal::from(&actor)
    }

    async fn deposit(&self, who: &Principal, amount: i64) {
        self.service
            .deposit(who, &DepositRequest::new(Decimal::from(amount), "USD"))
            .await
            .unwrap();
    }

    async fn balance(&self, who: &Principal) -> Decimal {
        self.service
            .get_balances(who)
            .await
            .unwrap()
            .get(&usd())
            .copied()
            .unwrap_or_default()
    }

    fn scanner(&self) -> FraudScanner {
        FraudScanner::new(
            self.db.clone(),
            self.notifier.clone(),
            ScannerConfig::default(),
        )
    }
}

fn usd() -> Currency {
    Currency::from_str("USD").unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_never_overdraw() {
    let h = Harness::new();
    let alice = h.register("Alice", "alice@example.com").await;
    h.deposit(&alice, 100).await;

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let service = Arc::clone(&h.service);
        let alice = alice.clone();
        tasks.push(tokio::spawn(async move {
            service
                .withdraw(&alice, &WithdrawRequest::new(Decimal::from(10), "USD"))
                .await
        }));
    }

    let mut succeeded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(AppError::Ledger(LedgerError::InsufficientFunds { .. })) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(succeeded, 10);
    assert_eq!(h.balance(&alice).await, Decimal::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transfers_drain_exactly() {
    let h = Harness::new();
    let alice = h.register("Alice", "alice@example.com").await;
    let bob = h.register("Bob", "bob@example.com").await;
    let n = 8;
    h.deposit(&alice, 25 * n).await;

    let mut tasks = Vec::new();
    for _ in 0..n {
        let service = Arc::clone(&h.service);
        let alice = alice.clone();
        tasks.push(tokio::spawn(async move {
            service
                .transfer(
                    &alice,
                    &TransferRequest::new("bob@example.com", Decimal::from(25), "USD"),
                )
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(h.balance(&alice).await, Decimal::ZERO);
    assert_eq!(h.balance(&bob).await, Decimal::from(25 * n));
    let transfers = h
        .db
        .query_transactions(
            &TransactionFilter::new()
                .from_source(alice.actor_id)
                .kind(TransactionKind::Transfer),
        )
        .await
        .unwrap();
    assert_eq!(transfers.len(), n as usize);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_transfers_do_not_deadlock() {
    let h = Harness::with_evaluator(FraudEvaluator::with_rules(vec![]));
    let alice = h.register("Alice", "alice@example.com").await;
    let bob = h.register("Bob", "bob@example.com").await;
    h.deposit(&alice, 100).await;
    h.deposit(&bob, 100).await;

    let mut tasks = Vec::new();
    for i in 0..20 {
        let service = Arc::clone(&h.service);
        let (from, to) = if i % 2 == 0 {
            (alice.clone(), "bob@example.com")
        } else {
            (bob.clone(), "alice@example.com")
        };
        tasks.push(tokio::spawn(async move {
            service
                .transfer(&from, &TransferRequest::new(to, Decimal::from(5), "USD"))
                .await
        }));
    }
    let joined = tokio::time::timeout(Duration::from_secs(10), async {
        for task in tasks {
            task.await.unwrap().unwrap();
        }
    })
    .await;
    assert!(joined.is_ok(), "transfers did not complete");

    assert_eq!(
        h.balance(&alice).await + h.balance(&bob).await,
        Decimal::from(200)
    );
}

#[tokio::test]
async fn test_failed_transfer_leaves_no_trace() {
    let h = Harness::new();
    let alice = h.register("Alice", "alice@example.com").await;
    let bob = h.register("Bob", "bob@example.com").await;
    h.deposit(&alice, 50).await;

    let result = h
        .service
        .transfer(
            &alice,
            &TransferRequest::new("bob@example.com", Decimal::from(80), "USD"),
        )
        .await;
    assert!(matches!(
        result,
        Err(AppError::Ledger(LedgerError::InsufficientFunds { .. }))
    ));

    let unknown = h
        .service
        .transfer(
            &alice,
            &TransferRequest::new("nobody@example.com", Decimal::from(5), "USD"),
        )
        .await;
    assert!(matches!(
        unknown,
        Err(AppError::Ledger(LedgerError::ActorNotFound(_)))
    ));

    assert_eq!(h.balance(&alice).await, Decimal::from(50));
    assert_eq!(h.balance(&bob).await, Decimal::ZERO);
    let history = h
        .service
        .get_history(&bob, &HistoryParams::default())
        .await
        .unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn test_transfer_to_deleted_actor_is_rejected() {
    let h = Harness::new();
    let alice = h.register("Alice", "alice@example.com").await;
    let bob = h.register("Bob", "bob@example.com").await;
    h.deposit(&alice, 50).await;
    h.db.soft_delete_actor(bob.actor_id).await.unwrap();

    let result = h
        .service
        .transfer(
            &alice,
            &TransferRequest::new(bob.actor_id.to_string(), Decimal::from(5), "USD"),
        )
        .await;
    assert!(matches!(
        result,
        Err(AppError::Ledger(LedgerError::ActorNotFound(_)))
    ));
    assert_eq!(h.balance(&alice).await, Decimal::from(50));
}

#[tokio::test]
async fn test_invalid_amount_touches_nothing() {
    let h = Harness::new();
    let alice = h.register("Alice", "alice@example.com").await;

    for amount in [Decimal::ZERO, Decimal::from(-5)] {
        let result = h
            .service
            .deposit(&alice, &DepositRequest::new(amount, "USD"))
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
    assert_eq!(h.db.commit_attempts(), 0);
    assert!(h.service.get_balances(&alice).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fourth_transfer_within_a_minute_is_flagged() {
    let h = Harness::new();
    let alice = h.register("Alice", "alice@example.com").await;
    h.register("Bob", "bob@example.com").await;
    h.deposit(&alice, 100).await;

    let mut receipts = Vec::new();
    for _ in 0..4 {
        receipts.push(
            h.service
                .transfer(
                    &alice,
                    &TransferRequest::new("bob@example.com", Decimal::from(1), "USD"),
                )
                .await
                .unwrap(),
        );
    }

    assert!(!receipts[2].is_flagged());
    assert!(receipts[3].is_flagged());
    assert_eq!(
        receipts[3].fraud_reason.as_deref(),
        Some("Too many transfers in a short period")
    );
    assert_eq!(receipts[3].transaction.status, TransactionStatus::Flagged);

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "alice@example.com");
    assert_eq!(sent[0].subject, "Suspicious Transfer Alert");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transfers_count_velocity_consistently() {
    let h = Harness::new();
    let alice = h.register("Alice", "alice@example.com").await;
    h.register("Bob", "bob@example.com").await;
    h.deposit(&alice, 100).await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&h.service);
        let alice = alice.clone();
        tasks.push(tokio::spawn(async move {
            service
                .transfer(
                    &alice,
                    &TransferRequest::new("bob@example.com", Decimal::from(1), "USD"),
                )
                .await
        }));
    }

    let mut flagged = 0;
    for task in tasks {
        if task.await.unwrap().unwrap().is_flagged() {
            flagged += 1;
        }
    }

    // Every transfer after the third in the window sees all earlier ones
    assert_eq!(flagged, 5);
    assert_eq!(h.notifier.sent_count(), 5);
    assert_eq!(h.balance(&alice).await, Decimal::from(92));
}

#[tokio::test]
async fn test_large_withdrawal_boundary() {
    let h = Harness::new();
    let alice = h.register("Alice", "alice@example.com").await;
    h.deposit(&alice, 5000).await;

    let at_limit = h
        .service
        .withdraw(&alice, &WithdrawRequest::new(Decimal::from(1000), "USD"))
        .await
        .unwrap();
    assert!(!at_limit.is_flagged());

    let above = h
        .service
        .withdraw(&alice, &WithdrawRequest::new(Decimal::from(1001), "USD"))
        .await
        .unwrap();
    assert!(above.is_flagged());
    assert_eq!(above.fraud_reason.as_deref(), Some("Large withdrawal"));
    assert_eq!(above.transaction.reason(), Some("Large withdrawal"));
}

#[tokio::test]
async fn test_deposit_withdraw_scenario() {
    let h = Harness::new();
    let alice = h.register("Alice", "alice@example.com").await;

    h.deposit(&alice, 500).await;
    let overdraw = h
        .service
        .withdraw(&alice, &WithdrawRequest::new(Decimal::from(1500), "USD"))
        .await;
    assert!(matches!(
        overdraw,
        Err(AppError::Ledger(LedgerError::InsufficientFunds { .. }))
    ));

    h.deposit(&alice, 1100).await;
    let receipt = h
        .service
        .withdraw(&alice, &WithdrawRequest::new(Decimal::from(1200), "USD"))
        .await
        .unwrap();
    assert_eq!(receipt.fraud_reason.as_deref(), Some("Large withdrawal"));
    assert_eq!(h.balance(&alice).await, Decimal::from(400));

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Suspicious Withdrawal Alert");
    assert!(sent[0].body.contains("1200 USD"));
}

#[tokio::test]
async fn test_notification_failure_does_not_roll_back() {
    let db = Arc::new(MockDatabaseClient::new());
    let service = LedgerService::with_config(
        db.clone(),
        Arc::new(MockNotifier::failing()),
        FraudEvaluator::default(),
        fast_retries(),
    );
    let actor = service
        .register_actor(&NewActor::new("Alice", "alice@example.com"))
        .await
        .unwrap();
    let alice = Principal::from(&actor);
    service
        .deposit(&alice, &DepositRequest::new(Decimal::from(2000), "USD"))
        .await
        .unwrap();

    let receipt = service
        .withdraw(&alice, &WithdrawRequest::new(Decimal::from(1500), "USD"))
        .await
        .unwrap();
    assert!(receipt.is_flagged());
    assert_eq!(
        service.get_balances(&alice).await.unwrap()[&usd()],
        Decimal::from(500)
    );
}

#[tokio::test]
async fn test_commit_conflicts_are_retried() {
    let h = Harness::new();
    let alice = h.register("Alice", "alice@example.com").await;

    h.db.fail_next_commits(2);
    h.deposit(&alice, 40).await;
    assert_eq!(h.db.commit_attempts(), 3);
    assert_eq!(h.balance(&alice).await, Decimal::from(40));

    h.db.fail_next_commits(3);
    let result = h
        .service
        .deposit(&alice, &DepositRequest::new(Decimal::from(10), "USD"))
        .await;
    assert!(matches!(
        result,
        Err(AppError::Database(DatabaseError::Conflict(_)))
    ));
    assert_eq!(h.balance(&alice).await, Decimal::from(40));
    let history = h
        .service
        .get_history(&alice, &HistoryParams::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_scan_flags_once_and_notifies_once() {
    // Synchronous rules disabled so large withdrawals are committed unflagged
    let h = Harness::with_evaluator(FraudEvaluator::with_rules(vec![]));
    let alice = h.register("Alice", "alice@example.com").await;
    h.deposit(&alice, 3000).await;
    let receipt = h
        .service
        .withdraw(&alice, &WithdrawRequest::new(Decimal::from(1500), "USD"))
        .await
        .unwrap();
    assert!(!receipt.is_flagged());

    let scanner = h.scanner();
    let first = scanner.run_once().await.unwrap();
    assert_eq!(first.matched, 1);
    assert_eq!(first.flagged, 1);
    let second = scanner.run_once().await.unwrap();
    assert_eq!(second.matched, 0);

    assert_eq!(
        h.db.mark_flagged(receipt.transaction.id, "Large withdrawal")
            .await
            .unwrap(),
        FlagOutcome::AlreadyFlagged
    );

    let stored = h
        .db
        .get_transaction(receipt.transaction.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TransactionStatus::Flagged);
    assert_eq!(stored.amount, Decimal::from(1500));

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Suspicious Transaction Alert");
    assert!(sent[0].body.contains(&receipt.transaction.id.to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overlapping_scans_are_rejected() {
    let h = Harness::new();
    let scanner = Arc::new(h.scanner());
    h.db.hold_queries();

    let first = tokio::spawn({
        let scanner = Arc::clone(&scanner);
        async move { scanner.run_once().await }
    });
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.db.query_calls() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("first scan never reached the store");
    assert!(scanner.is_running());

    assert!(matches!(
        scanner.run_once().await,
        Err(ScanError::AlreadyRunning)
    ));
    assert_eq!(h.db.query_calls(), 1);

    h.db.release_queries();
    first.await.unwrap().unwrap();
    assert!(!scanner.is_running());

    scanner.run_once().await.unwrap();
    assert_eq!(h.db.query_calls(), 2);
}

#[tokio::test]
async fn test_scan_isolates_record_failures() {
    let h = Harness::with_evaluator(FraudEvaluator::with_rules(vec![]));
    let alice = h.register("Alice", "alice@example.com").await;
    h.deposit(&alice, 5000).await;
    let mut ids = Vec::new();
    for _ in 0..3 {
        let receipt = h
            .service
            .withdraw(&alice, &WithdrawRequest::new(Decimal::from(1200), "USD"))
            .await
            .unwrap();
        ids.push(receipt.transaction.id);
    }
    h.db.fail_flagging(ids[1]);

    let report = h.scanner().run_once().await.unwrap();
    assert_eq!(report.matched, 3);
    assert_eq!(report.flagged, 2);
    assert_eq!(report.failed, 1);

    let remaining = h
        .db
        .get_transaction(ids[1])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(remaining.status, TransactionStatus::Completed);
}

#[tokio::test]
async fn test_scan_skips_alert_for_deleted_owner() {
    let h = Harness::with_evaluator(FraudEvaluator::with_rules(vec![]));
    let alice = h.register("Alice", "alice@example.com").await;
    h.deposit(&alice, 2000).await;
    h.service
        .withdraw(&alice, &WithdrawRequest::new(Decimal::from(1500), "USD"))
        .await
        .unwrap();
    h.db.soft_delete_actor(alice.actor_id).await.unwrap();

    let report = h.scanner().run_once().await.unwrap();
    assert_eq!(report.flagged, 1);
    assert_eq!(h.notifier.sent_count(), 0);
}

#[tokio::test]
async fn test_rate_limiter_blocks_eleventh_request() {
    let db = Arc::new(MockDatabaseClient::new());
    let limiter = Arc::new(SlidingWindowLimiter::new(RateLimitConfig {
        window: Duration::from_millis(300),
        ..Default::default()
    }));
    let service = LedgerService::with_config(
        db.clone(),
        Arc::new(MockNotifier::new()),
        FraudEvaluator::default(),
        fast_retries(),
    )
    .with_rate_limiter(limiter);
    let actor = service
        .register_actor(&NewActor::new("Alice", "alice@example.com"))
        .await
        .unwrap();
    let alice = Principal::from(&actor);
    let request = DepositRequest::new(Decimal::from(1), "USD");

    for _ in 0..10 {
        service.deposit(&alice, &request).await.unwrap();
    }
    assert!(matches!(
        service.deposit(&alice, &request).await,
        Err(AppError::RateLimited)
    ));
    assert_eq!(db.commit_attempts(), 10);

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(service.deposit(&alice, &request).await.is_ok());
}

#[tokio::test]
async fn test_soft_delete_hides_but_keeps_balances() {
    let h = Harness::new();
    let admin = h.admin().await;
    let alice = h.register("Alice", "alice@example.com").await;
    h.deposit(&alice, 3000).await;
    let flagged = h
        .service
        .withdraw(&alice, &WithdrawRequest::new(Decimal::from(2000), "USD"))
        .await
        .unwrap();
    assert_eq!(h.service.list_flagged(&admin).await.unwrap().len(), 1);

    h.service
        .soft_delete_transaction(&alice, flagged.transaction.id)
        .await
        .unwrap();

    assert!(h.service.list_flagged(&admin).await.unwrap().is_empty());
    let history = h
        .service
        .get_history(&alice, &HistoryParams::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, TransactionKind::Deposit);
    assert_eq!(h.balance(&alice).await, Decimal::from(1000));

    let again = h
        .service
        .soft_delete_transaction(&alice, flagged.transaction.id)
        .await;
    assert!(matches!(
        again,
        Err(AppError::Database(DatabaseError::NotFound(_)))
    ));
}

#[tokio::test]
async fn test_soft_delete_requires_party_or_admin() {
    let h = Harness::new();
    let admin = h.admin().await;
    let alice = h.register("Alice", "alice@example.com").await;
    let mallory = h.register("Mallory", "mallory@example.com").await;
    let receipt = h
        .service
        .deposit(&alice, &DepositRequest::new(Decimal::from(10), "USD"))
        .await
        .unwrap();

    let denied = h
        .service
        .soft_delete_transaction(&mallory, receipt.transaction.id)
        .await;
    assert!(matches!(denied, Err(AppError::Authorization(_))));

    h.service
        .soft_delete_transaction(&admin, receipt.transaction.id)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_history_is_newest_first_and_limited() {
    let h = Harness::new();
    let alice = h.register("Alice", "alice@example.com").await;
    for amount in 1..=5 {
        h.deposit(&alice, amount).await;
    }

    let params = HistoryParams {
        limit: 3,
        ..Default::default()
    };
    let history = h.service.get_history(&alice, &params).await.unwrap();
    let amounts: Vec<Decimal> = history.iter().map(|tx| tx.amount).collect();
    assert_eq!(
        amounts,
        vec![Decimal::from(5), Decimal::from(4), Decimal::from(3)]
    );

    let too_many = HistoryParams {
        limit: 501,
        ..Default::default()
    };
    assert!(matches!(
        h.service.get_history(&alice, &too_many).await,
        Err(AppError::Validation(_))
    ));
}

#[tokio::test]
async fn test_admin_reports() {
    let h = Harness::new();
    let admin = h.admin().await;
    let alice = h.register("Alice", "alice@example.com").await;
    let bob = h.register("Bob", "bob@example.com").await;
    let carol = h.register("Carol", "carol@example.com").await;

    h.deposit(&alice, 300).await;
    h.deposit(&bob, 100).await;
    h.service
        .deposit(&bob, &DepositRequest::new(Decimal::from(50), "EUR"))
        .await
        .unwrap();
    h.deposit(&carol, 999).await;
    h.db.soft_delete_actor(carol.actor_id).await.unwrap();

    let totals = h.service.aggregate_balances(&admin).await.unwrap();
    assert_eq!(totals[&usd()], Decimal::from(400));
    assert_eq!(totals[&Currency::from_str("EUR").unwrap()], Decimal::from(50));

    let top = h.service.top_balances(&admin, Some(2)).await.unwrap();
    assert_eq!(top.len(), 2);
    assert_eq!(top[0].email, "alice@example.com");
    assert_eq!(top[0].total, Decimal::from(300));
    assert_eq!(top[1].email, "bob@example.com");
    assert_eq!(top[1].total, Decimal::from(150));
}

#[tokio::test]
async fn test_deposit_beyond_maximum_balance_is_rejected() {
    let h = Harness::new();
    let alice = h.register("Alice", "alice@example.com").await;
    h.service
        .deposit(&alice, &DepositRequest::new(Decimal::MAX, "USD"))
        .await
        .unwrap();

    let result = h
        .service
        .deposit(&alice, &DepositRequest::new(Decimal::ONE, "USD"))
        .await;
    assert!(matches!(
        result,
        Err(AppError::Ledger(LedgerError::BalanceOverflow { .. }))
    ));
    assert_eq!(h.balance(&alice).await, Decimal::MAX);

    let history = h
        .service
        .get_history(&alice, &HistoryParams::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_transfer_beyond_maximum_balance_is_rejected() {
    let h = Harness::with_evaluator(FraudEvaluator::with_rules(vec![]));
    let alice = h.register("Alice", "alice@example.com").await;
    let bob = h.register("Bob", "bob@example.com").await;
    h.deposit(&alice, 10).await;
    h.service
        .deposit(&bob, &DepositRequest::new(Decimal::MAX, "USD"))
        .await
        .unwrap();

    let result = h
        .service
        .transfer(
            &alice,
            &TransferRequest::new("bob@example.com", Decimal::from(5), "USD"),
        )
        .await;
    assert!(matches!(
        result,
        Err(AppError::Ledger(LedgerError::BalanceOverflow { .. }))
    ));
    assert_eq!(h.balance(&alice).await, Decimal::from(10));
    assert_eq!(h.balance(&bob).await, Decimal::MAX);
}

#[tokio::test]
async fn test_admin_reports_surface_total_overflow() {
    let h = Harness::new();
    let admin = h.admin().await;
    let alice = h.register("Alice", "alice@example.com").await;
    let bob = h.register("Bob", "bob@example.com").await;

    h.service
        .deposit(&alice, &DepositRequest::new(Decimal::MAX, "USD"))
        .await
        .unwrap();
    h.deposit(&bob, 1).await;
    assert!(matches!(
        h.service.aggregate_balances(&admin).await,
        Err(AppError::Ledger(LedgerError::TotalOverflow(_)))
    ));

    h.service
        .deposit(&alice, &DepositRequest::new(Decimal::ONE, "EUR"))
        .await
        .unwrap();
    assert!(matches!(
        h.service.top_balances(&admin, None).await,
        Err(AppError::Ledger(LedgerError::TotalOverflow(_)))
    ));
}

#[tokio::test]
async fn test_deleted_wallet_reports_not_found() {
    let h = Harness::new();
    let alice = h.register("Alice", "alice@example.com").await;
    h.db.soft_delete_actor(alice.actor_id).await.unwrap();

    assert!(matches!(
        h.service.get_balances(&alice).await,
        Err(AppError::Ledger(LedgerError::WalletNotFound(_)))
    ));
    assert!(matches!(
        h.service
            .deposit(&alice, &DepositRequest::new(Decimal::from(1), "USD"))
            .await,
        Err(AppError::Ledger(LedgerError::WalletNotFound(_)))
    ));
}
