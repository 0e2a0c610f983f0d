//! # Custodian
//!
//! Thread-safe handle that owns one [`Ledger`] and the [`ExternalWallets`]
//! it pays into. Every operation holds a single mutex from its first check
//! through the outbound transfer, so no two operations ever interleave. This
//! is the serialization a ledger hosted on a shared execution environment
//! gets for free.
//!
//! Deposits are two-phase. The custodian first collects the value from the
//! caller's wallet, which is the "funds received" precondition, and only then
//! runs the ledger's accounting. If the ledger rejects the deposit, the
//! collected value is refunded before the lock is released.

use custody_protocol::{Address, LedgerConfig};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::{AuditReport, EventSink, Ledger, LedgerError, LedgerSnapshot};
use crate::transfer::TransferError;
use crate::wallets::ExternalWallets;

/// Errors surfaced by [`Custodian`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CustodyError {
    /// The ledger rejected the operation.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The deposit's value could not be collected from the caller's wallet.
    #[error("deposit funds not received: {0}")]
    FundsNotReceived(#[source] TransferError),

    /// A wallet-only operation failed.
    #[error("wallet error: {0}")]
    Wallet(#[source] TransferError),
}

/// Invariants across the ledger and the custodian's holdings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyAudit {
    pub ledger: AuditReport,
    /// Value physically held by the custodian.
    pub custody: u64,
    /// `custody == ledger.total_deposited`.
    pub custody_matches: bool,
}

impl CustodyAudit {
    pub fn is_healthy(&self) -> bool {
        self.ledger.is_healthy() && self.custody_matches
    }
}

/// State right after a successful deposit or withdrawal, read under the same
/// lock that applied it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// The caller's ledger balance.
    pub balance: u64,
    pub snapshot: LedgerSnapshot,
}

impl Settlement {
    fn read(ledger: &Ledger, account: &Address) -> Self {
        Self {
            balance: ledger.balance_of(account),
            snapshot: ledger.snapshot(),
        }
    }
}

struct CustodyState {
    ledger: Ledger,
    wallets: ExternalWallets,
}

/// Serialized access to a ledger and its external wallets.
///
/// Share it as `Arc<Custodian>`.
pub struct Custodian {
    state: Mutex<CustodyState>,
}

impl Custodian {
    /// Wraps `ledger` with an empty wallet book.
    pub fn new(ledger: Ledger) -> Self {
        Self::with_wallets(ledger, ExternalWallets::new())
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(Ledger::from_config(config))
    }

    pub fn with_wallets(ledger: Ledger, wallets: ExternalWallets) -> Self {
        Self {
            state: Mutex::new(CustodyState { ledger, wallets }),
        }
    }

    /// Collects `amount` from `caller`'s wallet and credits it in the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::FundsNotReceived`] if the wallet cannot cover
    /// the amount; nothing changes.
    /// Returns [`CustodyError::Ledger`] if the ledger rejects the deposit; the
    /// collected value is refunded first.
    pub fn deposit(&self, caller: &Address, amount: u64) -> Result<Settlement, CustodyError> {
        let mut state = self.state.lock();
        let CustodyState { ledger, wallets } = &mut *state;

        wallets
            .collect(caller, amount)
            .map_err(CustodyError::FundsNotReceived)?;

        if let Err(err) = ledger.deposit(caller, amount) {
            wallets.refund(caller, amount).map_err(CustodyError::Wallet)?;
            tracing::info!(
                account = %caller,
                amount,
                error = %err,
                "deposit rejected, funds refunded"
            );
            return Err(err.into());
        }
        Ok(Settlement::read(ledger, caller))
    }

    /// Withdraws `amount` from the ledger and pays it into `caller`'s wallet.
    pub fn withdraw(&self, caller: &Address, amount: u64) -> Result<Settlement, CustodyError> {
        let mut state = self.state.lock();
        let CustodyState { ledger, wallets } = &mut *state;
        ledger.withdraw(caller, amount, wallets)?;
        Ok(Settlement::read(ledger, caller))
    }

    /// Ledger balance of `account`.
    pub fn balance_of(&self, account: &Address) -> u64 {
        self.state.lock().ledger.balance_of(account)
    }

    /// External wallet balance of `account`.
    pub fn wallet_balance(&self, account: &Address) -> u64 {
        self.state.lock().wallets.balance_of(account)
    }

    /// Adds fresh external value to `account`'s wallet.
    pub fn fund_wallet(&self, account: &Address, amount: u64) -> Result<u64, CustodyError> {
        self.state
            .lock()
            .wallets
            .credit(account, amount)
            .map_err(CustodyError::Wallet)
    }

    /// Makes withdrawals paid to `account` fail (or succeed again).
    pub fn reject_transfers_to(&self, account: &Address, reject: bool) {
        self.state
            .lock()
            .wallets
            .reject_transfers_to(account, reject);
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.state.lock().ledger.snapshot()
    }

    pub fn audit(&self) -> CustodyAudit {
        let state = self.state.lock();
        let ledger = state.ledger.audit();
        let custody = state.wallets.custody();
        CustodyAudit {
            ledger,
            custody,
            custody_matches: custody == ledger.total_deposited,
        }
    }

    /// Registers an observer on the underlying ledger.
    pub fn subscribe(&self, sink: impl EventSink + 'static) {
        self.state.lock().ledger.subscribe(sink);
    }

    /// Runs `f` against the ledger while holding the lock.
    pub fn with_ledger<R>(&self, f: impl FnOnce(&Ledger) -> R) -> R {
        f(&self.state.lock().ledger)
    }
}
