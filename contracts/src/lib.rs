//! # Custody Ledger Contracts
//!
//! The accounting core of the custody ledger: one shared pool, per-account
//! balances, a fixed per-withdrawal ceiling, and a fixed pool capacity.
//!
//! - **ledger**: the state machine (`deposit`, `withdraw`, `balance_of`),
//!   its errors, events, and audit views.
//! - **transfer**: the seam through which withdrawals move value out.
//! - **wallets**: an in-memory value transport: party wallets plus the
//!   custodian's holdings.
//! - **custodian**: a mutex-guarded ledger + wallets handle for concurrent
//!   hosts.
//!
//! ## Design Principles
//!
//! 1. All monetary arithmetic is checked. Overflow is an error, never a wrap.
//! 2. Rejections are typed and carry the operands that caused them.
//! 3. A rejected or failed operation has no side effects at all. Withdrawals
//!    that fail during the outbound transfer roll back through the journal.
//! 4. State is written before value leaves custody, so re-entrant callers
//!    always see the post-withdrawal balance.

mod journal;

pub mod custodian;
pub mod ledger;
pub mod transfer;
pub mod wallets;

pub use custodian::{Custodian, CustodyAudit, CustodyError, Settlement};
pub use ledger::{AuditReport, EventSink, Ledger, LedgerError, LedgerEvent, LedgerSnapshot};
pub use transfer::{transfer_fn, FnTransport, TransferError, ValueTransport};
pub use wallets::ExternalWallets;
