//! Concurrency tests for the custodian.
//!
//! Many threads deposit and withdraw against one shared custodian at once.
//! Whatever interleaving the scheduler picks, the books must balance: the
//! ledger total equals the sum of balances, equals the value in custody,
//! and no value is created or destroyed across ledger + wallets.

use std::sync::Arc;
use std::thread;

use custody_contracts::custodian::{Custodian, CustodyError};
use custody_contracts::ledger::{Ledger, LedgerError, LedgerEvent};
use custody_contracts::wallets::ExternalWallets;
use custody_protocol::Address;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const THREADS: usize = 8;
const OPS_PER_THREAD: usize = 400;
const INITIAL_WALLET: u64 = 10_000;

fn shared_custodian(limit: u64, capacity: u64) -> Arc<Custodian> {
    Arc::new(Custodian::new(Ledger::new(limit, capacity)))
}

#[test]
fn concurrent_operations_keep_books_balanced() {
    let custodian = shared_custodian(250, 20_000);
    let accounts: Vec<Address> = (0..THREADS as u8).map(|i| Address::repeat_byte(i + 1)).collect();
    for account in &accounts {
        custodian.fund_wallet(account, INITIAL_WALLET).unwrap();
    }

    let handles: Vec<_> = accounts
        .iter()
        .enumerate()
        .map(|(i, &account)| {
            let custodian = Arc::clone(&custodian);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(i as u64);
                for _ in 0..OPS_PER_THREAD {
                    let amount = rng.gen_range(1..400u64);
                    let result = if rng.gen_bool(0.6) {
                        custodian.deposit(&account, amount)
                    } else {
                        custodian.withdraw(&account, amount)
                    };
                    // Every failure must be one of the typed rejections.
                    if let Err(err) = result {
                        assert!(matches!(
                            err,
                            CustodyError::FundsNotReceived(_)
                                | CustodyError::Ledger(LedgerError::BankCapExceeded { .. })
                                | CustodyError::Ledger(LedgerError::InsufficientBalance { .. })
                                | CustodyError::Ledger(LedgerError::WithdrawalOverLimit { .. })
                        ));
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    let audit = custodian.audit();
    assert!(audit.is_healthy(), "books out of balance: {:?}", audit);

    // Value is conserved across ledger and wallets.
    let held: u64 = accounts
        .iter()
        .map(|a| custodian.balance_of(a) + custodian.wallet_balance(a))
        .sum();
    assert_eq!(held, INITIAL_WALLET * THREADS as u64);
}

#[test]
fn concurrent_withdrawals_never_overdraw() {
    let custodian = shared_custodian(10, 10_000);
    let account = Address::repeat_byte(0x42);
    custodian.fund_wallet(&account, 1_000).unwrap();
    custodian.deposit(&account, 1_000).unwrap();

    // 8 threads x 20 withdrawals x 10 = 1_600 requested against 1_000 held.
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let custodian = Arc::clone(&custodian);
            thread::spawn(move || {
                (0..20)
                    .filter(|_| custodian.withdraw(&account, 10).is_ok())
                    .count()
            })
        })
        .collect();

    let succeeded: usize = handles
        .into_iter()
        .map(|h| h.join().expect("worker thread panicked"))
        .sum();

    assert_eq!(succeeded, 100);
    assert_eq!(custodian.balance_of(&account), 0);
    assert_eq!(custodian.wallet_balance(&account), 1_000);
    assert!(custodian.audit().is_healthy());
}

#[test]
fn observers_see_every_committed_event_once() {
    let custodian = shared_custodian(1_000, 1_000_000);
    let log = Arc::new(Mutex::new(Vec::new()));
    let log_ref = Arc::clone(&log);
    custodian.subscribe(move |event: &LedgerEvent| log_ref.lock().push(event.clone()));

    let handles: Vec<_> = (0..4u8)
        .map(|i| {
            let custodian = Arc::clone(&custodian);
            thread::spawn(move || {
                let account = Address::repeat_byte(0x80 + i);
                custodian.fund_wallet(&account, 100).unwrap();
                for _ in 0..10 {
                    custodian.deposit(&account, 10).unwrap();
                }
                for _ in 0..5 {
                    custodian.withdraw(&account, 10).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    let log = log.lock();
    let deposits = log
        .iter()
        .filter(|e| matches!(e, LedgerEvent::Deposit { .. }))
        .count();
    let withdrawals = log.len() - deposits;
    assert_eq!(deposits, 40);
    assert_eq!(withdrawals, 20);

    let snapshot = custodian.snapshot();
    assert_eq!(snapshot.deposit_count, 40);
    assert_eq!(snapshot.withdrawal_count, 20);
    assert_eq!(snapshot.total_deposited, 4 * 50);
}

#[test]
fn prefunded_wallet_book_can_be_supplied() {
    let account = Address::repeat_byte(0x77);
    let mut wallets = ExternalWallets::new();
    wallets.credit(&account, 300).unwrap();
    let custodian = Custodian::with_wallets(Ledger::new(100, 1_000), wallets);

    custodian.deposit(&account, 300).unwrap();
    custodian.withdraw(&account, 100).unwrap();

    assert_eq!(custodian.balance_of(&account), 200);
    assert_eq!(custodian.wallet_balance(&account), 100);
    assert_eq!(custodian.with_ledger(|l| l.withdrawal_count()), 1);
    assert!(custodian.audit().is_healthy());
}
