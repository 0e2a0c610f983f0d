//! # Custody Ledger
//!
//! A single shared pool. Parties deposit native value into it and withdraw
//! their own share back out, subject to two fixed ceilings:
//!
//! - **withdrawal limit**: the most any single withdrawal may move.
//! - **capacity**: the most value the pool may hold in aggregate.
//!
//! ## Withdrawal Ordering
//!
//! `withdraw` follows checks-effects-interactions strictly:
//!
//! 1. **Checks**: balance first, then the per-withdrawal limit.
//! 2. **Effects**: balance, total, and counter are written to ledger state.
//! 3. **Interaction**: the value transport moves the funds out.
//!
//! The transport receives the ledger itself, so a recipient can call straight
//! back into `withdraw`. It will see the already-decremented balance. If the
//! transport fails, the ledger rolls back every write made since step 2,
//! including writes made by re-entrant calls, and no event is published.
//!
//! ## Invariants
//!
//! After every completed operation:
//!
//! - `total_deposited == Σ balance_of(a)` over all accounts.
//! - `total_deposited <= capacity`.
//! - `withdrawal_limit` and `capacity` are the values given at construction.

use custody_protocol::{Address, LedgerConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::journal::{Aggregates, Checkpoint, Journal, JournalEntry};
use crate::transfer::{TransferError, ValueTransport};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Rejections raised by ledger operations.
///
/// Every variant aborts the operation with no change to ledger state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// A deposit carried no value.
    #[error("invalid amount: deposits must carry a nonzero value")]
    InvalidAmount,

    /// The deposit would push the pool above its capacity.
    #[error("bank cap exceeded: deposit would bring total to {attempted}, cap is {cap}")]
    BankCapExceeded {
        /// `total_deposited + amount`, saturating at `u64::MAX`.
        attempted: u64,
        /// The ledger's capacity.
        cap: u64,
    },

    /// The caller asked for more than they hold.
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Amount the caller tried to withdraw.
        requested: u64,
        /// The caller's current balance.
        available: u64,
    },

    /// The withdrawal exceeds the fixed per-withdrawal ceiling.
    #[error("withdrawal over limit: attempted {attempted}, limit is {limit}")]
    WithdrawalOverLimit {
        /// Amount the caller tried to withdraw.
        attempted: u64,
        /// The ledger's withdrawal limit.
        limit: u64,
    },

    /// The outbound transfer failed; all effects were rolled back.
    #[error("transfer failed: {0}")]
    TransferFailed(#[source] TransferError),

    /// A balance or counter would leave the `u64` range.
    #[error("arithmetic overflow in ledger accounting")]
    ArithmeticOverflow,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Notifications published to observers after a state change commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// `account` deposited `amount`.
    Deposit { account: Address, amount: u64 },
    /// `amount` was transferred out to `account`.
    Withdrawal { account: Address, amount: u64 },
}

impl LedgerEvent {
    /// The account the event concerns.
    pub fn account(&self) -> &Address {
        match self {
            LedgerEvent::Deposit { account, .. } | LedgerEvent::Withdrawal { account, .. } => {
                account
            }
        }
    }

    /// The value moved.
    pub fn amount(&self) -> u64 {
        match self {
            LedgerEvent::Deposit { amount, .. } | LedgerEvent::Withdrawal { amount, .. } => *amount,
        }
    }
}

/// An observer of committed ledger events. Fire-and-forget: sinks cannot
/// fail the operation that produced the event.
pub trait EventSink: Send {
    fn notify(&self, event: &LedgerEvent);
}

impl<F> EventSink for F
where
    F: Fn(&LedgerEvent) + Send,
{
    fn notify(&self, event: &LedgerEvent) {
        self(event)
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Read-only view of the ledger's parameters and aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub withdrawal_limit: u64,
    pub capacity: u64,
    pub total_deposited: u64,
    pub deposit_count: u64,
    pub withdrawal_count: u64,
    /// Accounts that have ever held a balance, including zeroed ones.
    pub account_count: usize,
}

/// Result of recomputing the ledger invariants from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    /// The tracked aggregate.
    pub total_deposited: u64,
    /// Σ of every account balance. Widened so the sum itself cannot overflow.
    pub sum_of_balances: u128,
    /// `total_deposited == sum_of_balances`.
    pub conserved: bool,
    /// `total_deposited <= capacity`.
    pub within_capacity: bool,
}

impl AuditReport {
    /// True when every invariant holds.
    pub fn is_healthy(&self) -> bool {
        self.conserved && self.within_capacity
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// The ledger state machine.
///
/// Owned by whoever constructs it. Every mutation takes `&mut self`; for
/// shared, multi-threaded access wrap it in a
/// [`Custodian`](crate::custodian::Custodian).
pub struct Ledger {
    withdrawal_limit: u64,
    capacity: u64,
    aggregates: Aggregates,
    balances: HashMap<Address, u64>,
    journal: Journal,
    sinks: Vec<Box<dyn EventSink>>,
}

impl Ledger {
    /// Creates an empty ledger. Both parameters are fixed for its lifetime.
    pub fn new(withdrawal_limit: u64, capacity: u64) -> Self {
        Self {
            withdrawal_limit,
            capacity,
            aggregates: Aggregates::default(),
            balances: HashMap::new(),
            journal: Journal::new(),
            sinks: Vec::new(),
        }
    }

    /// Creates an empty ledger from a loaded config.
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.withdrawal_limit, config.capacity)
    }

    /// Registers an observer for committed events.
    pub fn subscribe(&mut self, sink: impl EventSink + 'static) {
        self.sinks.push(Box::new(sink));
    }

    // -- operations ---------------------------------------------------------

    /// Credits `amount` to `caller`.
    ///
    /// The value is expected to be in the custodian's hands already; this
    /// call only does the accounting.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidAmount`] for a zero deposit.
    /// Returns [`LedgerError::BankCapExceeded`] if the new total would exceed
    /// capacity, including totals past `u64::MAX`.
    /// Returns [`LedgerError::ArithmeticOverflow`] if the deposit counter
    /// leaves the `u64` range.
    pub fn deposit(&mut self, caller: &Address, amount: u64) -> Result<(), LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let total = self.aggregates.total_deposited;
        let headroom = self.capacity.saturating_sub(total);
        if amount > headroom {
            return Err(LedgerError::BankCapExceeded {
                attempted: total.saturating_add(amount),
                cap: self.capacity,
            });
        }

        let attempted = total
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        let balance = self
            .balance_of(caller)
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        let deposit_count = self
            .aggregates
            .deposit_count
            .checked_add(1)
            .ok_or(LedgerError::ArithmeticOverflow)?;

        let checkpoint = self.journal.begin();
        self.write_balance(*caller, balance);
        self.write_aggregates(Aggregates {
            total_deposited: attempted,
            deposit_count,
            ..self.aggregates
        });
        self.journal.raise(LedgerEvent::Deposit {
            account: *caller,
            amount,
        });
        self.commit(checkpoint);

        tracing::debug!(
            account = %caller,
            amount,
            total_deposited = attempted,
            "deposit applied"
        );
        Ok(())
    }

    /// Debits `amount` from `caller` and pays it out through `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InsufficientBalance`] if `amount` exceeds the
    /// caller's balance (checked first).
    /// Returns [`LedgerError::WithdrawalOverLimit`] if `amount` exceeds the
    /// withdrawal limit.
    /// Returns [`LedgerError::TransferFailed`] if the transport fails; the
    /// ledger is left exactly as it was before the call.
    pub fn withdraw<T>(
        &mut self,
        caller: &Address,
        amount: u64,
        transport: &mut T,
    ) -> Result<(), LedgerError>
    where
        T: ValueTransport + ?Sized,
    {
        let available = self.balance_of(caller);
        if amount > available {
            return Err(LedgerError::InsufficientBalance {
                requested: amount,
                available,
            });
        }

        if amount > self.withdrawal_limit {
            return Err(LedgerError::WithdrawalOverLimit {
                attempted: amount,
                limit: self.withdrawal_limit,
            });
        }

        let remaining = available
            .checked_sub(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        let total_deposited = self
            .aggregates
            .total_deposited
            .checked_sub(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        let withdrawal_count = self
            .aggregates
            .withdrawal_count
            .checked_add(1)
            .ok_or(LedgerError::ArithmeticOverflow)?;

        // Effects land before the transfer so a re-entrant call sees them.
        let checkpoint = self.journal.begin();
        self.write_balance(*caller, remaining);
        self.write_aggregates(Aggregates {
            total_deposited,
            withdrawal_count,
            ..self.aggregates
        });

        if let Err(err) = transport.transfer(self, caller, amount) {
            self.rollback(checkpoint);
            tracing::warn!(account = %caller, amount, error = %err, "withdrawal rolled back");
            return Err(LedgerError::TransferFailed(err));
        }

        self.journal.raise(LedgerEvent::Withdrawal {
            account: *caller,
            amount,
        });
        self.commit(checkpoint);

        tracing::debug!(
            account = %caller,
            amount,
            total_deposited = self.aggregates.total_deposited,
            "withdrawal applied"
        );
        Ok(())
    }

    // -- queries ------------------------------------------------------------

    /// Current balance of `account`; zero if it never deposited.
    pub fn balance_of(&self, account: &Address) -> u64 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Sum of all balances currently held.
    pub fn total_deposited(&self) -> u64 {
        self.aggregates.total_deposited
    }

    /// Number of successful deposits so far.
    pub fn deposit_count(&self) -> u64 {
        self.aggregates.deposit_count
    }

    /// Number of successful withdrawals so far.
    pub fn withdrawal_count(&self) -> u64 {
        self.aggregates.withdrawal_count
    }

    pub fn withdrawal_limit(&self) -> u64 {
        self.withdrawal_limit
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Accounts that have ever held a balance. Zeroed accounts still count.
    pub fn account_count(&self) -> usize {
        self.balances.len()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            withdrawal_limit: self.withdrawal_limit,
            capacity: self.capacity,
            total_deposited: self.aggregates.total_deposited,
            deposit_count: self.aggregates.deposit_count,
            withdrawal_count: self.aggregates.withdrawal_count,
            account_count: self.balances.len(),
        }
    }

    /// Recomputes the invariants from the raw balances.
    pub fn audit(&self) -> AuditReport {
        let sum_of_balances: u128 = self.balances.values().map(|&b| b as u128).sum();
        let total_deposited = self.aggregates.total_deposited;
        AuditReport {
            total_deposited,
            sum_of_balances,
            conserved: sum_of_balances == total_deposited as u128,
            within_capacity: total_deposited <= self.capacity,
        }
    }

    // -- journaled writes ---------------------------------------------------

    fn write_balance(&mut self, account: Address, value: u64) {
        let previous = self.balances.insert(account, value);
        self.journal
            .record(JournalEntry::Balance { account, previous });
    }

    fn write_aggregates(&mut self, next: Aggregates) {
        let previous = std::mem::replace(&mut self.aggregates, next);
        self.journal.record(JournalEntry::Aggregates(previous));
    }

    fn commit(&mut self, checkpoint: Checkpoint) {
        if let Some(events) = self.journal.commit(checkpoint) {
            for event in &events {
                for sink in &self.sinks {
                    sink.notify(event);
                }
            }
        }
    }

    fn rollback(&mut self, checkpoint: Checkpoint) {
        let undone = self.journal.rollback(checkpoint);
        for entry in undone.into_iter().rev() {
            match entry {
                JournalEntry::Balance {
                    account,
                    previous: Some(value),
                } => {
                    self.balances.insert(account, value);
                }
                JournalEntry::Balance {
                    account,
                    previous: None,
                } => {
                    self.balances.remove(&account);
                }
                JournalEntry::Aggregates(previous) => self.aggregates = previous,
            }
        }
    }
}

impl fmt::Debug for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("withdrawal_limit", &self.withdrawal_limit)
            .field("capacity", &self.capacity)
            .field("aggregates", &self.aggregates)
            .field("accounts", &self.balances.len())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
