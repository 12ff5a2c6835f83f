//! Money conservation and exactly-once application under concurrency,
//! driven through the public crate API only.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use kc_bank::config::{QueueConfig, TransferConfig};
use kc_bank::ledger::{
    Account, AccountService, IbanGenerator, InMemoryLedgerStore, LedgerStore, OpenAccount,
};
use kc_bank::queue::{InMemoryQueue, TransferConsumer, TransferQueue};
use kc_bank::transfer::{
    CancelSignal, InMemoryIdempotencyGuard, OutcomeStatus, TransferCoordinator, TransferError,
    TransferRequest,
};

const ACCOUNTS: usize = 6;
const OPENING_BALANCE: i64 = 1_000;

struct Bank {
    ledger: Arc<InMemoryLedgerStore>,
    coordinator: Arc<TransferCoordinator>,
    accounts: Vec<Account>,
}

async fn bank(seed: u64) -> Bank {
    let ledger = Arc::new(InMemoryLedgerStore::new());
    let service = AccountService::with_generator(ledger.clone(), IbanGenerator::with_seed(seed));
    let mut accounts = Vec::new();
    for i in 0..ACCOUNTS {
        accounts.push(
            service
                .open(OpenAccount {
                    currency: "TRY".into(),
                    owner_user_id: format!("user-{i}"),
                    initial_balance: Decimal::from(OPENING_BALANCE),
                })
                .await
                .unwrap(),
        );
    }
    let coordinator = Arc::new(TransferCoordinator::new(
        ledger.clone(),
        Arc::new(InMemoryIdempotencyGuard::new()),
        &TransferConfig {
            max_attempts: 50,
            base_backoff_ms: 1,
            max_backoff_ms: 4,
            ..TransferConfig::default()
        },
    ));
    Bank {
        ledger,
        coordinator,
        accounts,
    }
}

fn expected_total() -> Decimal {
    Decimal::from(OPENING_BALANCE * ACCOUNTS as i64)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn random_concurrent_transfers_conserve_money() {
    let bank = bank(11).await;
    let mut rng = StdRng::seed_from_u64(42);

    let mut handles = Vec::new();
    for _ in 0..300 {
        let from = rng.gen_range(0..ACCOUNTS);
        let to = (from + rng.gen_range(1..ACCOUNTS)) % ACCOUNTS;
        // Up to 300.00, two decimals
        let amount = Decimal::new(rng.gen_range(1..30_000), 2);
        let req = TransferRequest::new(
            bank.accounts[from].iban.as_str(),
            bank.accounts[to].iban.as_str(),
            amount,
        );
        handles.push(bank.coordinator.spawn_execute(req));
    }

    let mut applied = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) if outcome.status == OutcomeStatus::Applied => applied += 1,
            Ok(_) => {}
            // Lost every race; nothing was applied
            Err(TransferError::Contention(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(applied > 0);

    let mut total = Decimal::ZERO;
    for account in bank.ledger.list().await.unwrap() {
        assert!(account.balance >= Decimal::ZERO, "{} overdrawn", account.iban);
        total += account.balance;
    }
    assert_eq!(total, expected_total());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn same_key_from_many_callers_applies_once() {
    let bank = bank(12).await;
    let req = TransferRequest::with_token(
        bank.accounts[0].iban.as_str(),
        bank.accounts[1].iban.as_str(),
        Decimal::from(100),
        "one-click",
    );

    let handles: Vec<_> = (0..16)
        .map(|_| bank.coordinator.spawn_execute(req.clone()))
        .collect();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) => assert_eq!(outcome.status, OutcomeStatus::Applied),
            Err(TransferError::InProgress(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    let from = bank.ledger.get(bank.accounts[0].id).await.unwrap();
    let to = bank.ledger.get(bank.accounts[1].id).await.unwrap();
    assert_eq!(from.balance, Decimal::from(OPENING_BALANCE - 100));
    assert_eq!(to.balance, Decimal::from(OPENING_BALANCE + 100));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn redelivered_queue_messages_apply_once() {
    let bank = bank(13).await;
    let queue = Arc::new(InMemoryQueue::new(20));
    let consumer = Arc::new(TransferConsumer::new(
        queue.clone(),
        bank.coordinator.clone(),
        &QueueConfig {
            workers: 4,
            nack_delay_ms: 1,
            ..QueueConfig::default()
        },
    ));

    // Ten logical transfers, each published three times
    let requests: Vec<_> = (0..10)
        .map(|i| {
            TransferRequest::with_token(
                bank.accounts[i % ACCOUNTS].iban.as_str(),
                bank.accounts[(i + 1) % ACCOUNTS].iban.as_str(),
                Decimal::from(10),
                &format!("msg-{i}"),
            )
        })
        .collect();
    for _ in 0..3 {
        for req in &requests {
            queue.publish(req).await.unwrap();
        }
    }

    let shutdown = CancelSignal::new();
    let pool = tokio::spawn(Arc::clone(&consumer).run(shutdown.clone()));
    tokio::time::timeout(Duration::from_secs(10), async {
        while queue.acked() < 30 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("every delivery should be acked");
    shutdown.cancel();
    pool.await.unwrap();

    assert!(queue.dead_letters().is_empty());
    for req in &requests {
        let outcome = bank
            .coordinator
            .outcome(&req.idempotency_key)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.is_applied());
    }

    // Each account sent 10 or 20 and received the same, once
    let mut total = Decimal::ZERO;
    for account in bank.ledger.list().await.unwrap() {
        total += account.balance;
    }
    assert_eq!(total, expected_total());
    let first = bank.ledger.get(bank.accounts[0].id).await.unwrap();
    // Sent msg-0 and msg-6, received msg-5
    assert_eq!(first.balance, Decimal::from(OPENING_BALANCE - 10));
}
