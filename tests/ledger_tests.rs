mod common;

use bustmaker::error::BustError;
use common::harness;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_spends_never_overdraw() {
    let h = harness();
    for (balance, spenders) in [(0u64, 3usize), (1, 2), (1, 10), (3, 10), (10, 4), (7, 7)] {
        let user = h.user_with_credits(balance).await;

        let mut handles = Vec::new();
        for i in 0..spenders {
            let ledger = h.app.ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.spend(user, 1, &format!("spender-{i}")).await
            }));
        }

        let mut succeeded = 0u64;
        let mut insufficient = 0u64;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(BustError::InsufficientCredits { .. }) => insufficient += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        let expected = balance.min(spenders as u64);
        assert_eq!(succeeded, expected, "B={balance} N={spenders}");
        assert_eq!(insufficient, spenders as u64 - expected);

        let account = h.app.ledger.account(user).await.unwrap();
        assert_eq!(account.credits, balance - expected);
        assert!(account.is_balanced());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interleaved_earn_and_spend_keep_audit_counters() {
    let h = harness();
    let user = h.user_with_credits(5).await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let ledger = h.app.ledger.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                ledger.earn(user, 2, "bonus").await.map(|_| ())
            } else {
                ledger.spend(user, 1, "upload").await.map(|_| ())
            }
        }));
    }
    for handle in handles {
        // Spends may lose to an empty balance only if they ran before the earns.
        let _ = handle.await.unwrap();
    }

    let account = h.app.ledger.account(user).await.unwrap();
    assert!(account.is_balanced());
    assert_eq!(account.total_earned, 5 + 10 * 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_random_spend_amounts_never_exceed_balance() {
    use rand::Rng;

    let h = harness();
    let user = h.user_with_credits(40).await;
    let amounts: Vec<u64> = {
        let mut rng = rand::thread_rng();
        (0..32).map(|_| rng.gen_range(1..=5)).collect()
    };

    let mut handles = Vec::new();
    for amount in amounts {
        let ledger = h.app.ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger.spend(user, amount, "batch").await.map(|_| amount)
        }));
    }
    let mut spent = 0u64;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(amount) => spent += amount,
            Err(BustError::InsufficientCredits { available, requested }) => {
                assert!(available < requested);
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    let account = h.app.ledger.account(user).await.unwrap();
    assert!(spent <= 40);
    assert_eq!(account.credits, 40 - spent);
    assert!(account.is_balanced());
}
