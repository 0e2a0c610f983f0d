//! # Value Transport
//!
//! The boundary between the ledger's accounting and the mechanism that
//! actually moves native value. The ledger calls a [`ValueTransport`] exactly
//! once per withdrawal, after its own state has been updated.
//!
//! A transport is handed `&mut Ledger` for the duration of the transfer. That
//! models a recipient able to run arbitrary code on receipt, including calling
//! back into the ledger. The only way back in is the ledger's public API.

use custody_protocol::Address;
use thiserror::Error;

use crate::ledger::Ledger;

/// Reasons an outbound transfer can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// The recipient refused the value.
    #[error("recipient {recipient} rejected the transfer")]
    Rejected {
        /// The refusing account.
        recipient: Address,
    },

    /// The custodian does not physically hold enough value to pay out.
    #[error("insufficient custody: requested {requested}, custodian holds {available}")]
    InsufficientCustody {
        /// Amount the ledger asked to send.
        requested: u64,
        /// Value currently in custody.
        available: u64,
    },

    /// A party's external wallet cannot cover a collection.
    #[error("insufficient funds in {account}: requested {requested}, available {available}")]
    InsufficientFunds {
        /// The wallet being debited.
        account: Address,
        /// Amount requested.
        requested: u64,
        /// Amount the wallet holds.
        available: u64,
    },

    /// A wallet or custody balance would leave the `u64` range.
    #[error("value overflow crediting {account}")]
    Overflow {
        /// The account being credited.
        account: Address,
    },
}

/// Moves native value out of custody.
pub trait ValueTransport {
    /// Sends `amount` to `to`.
    ///
    /// Must not touch ledger accounting except through the ledger's public
    /// operations. Returning an error makes the calling withdrawal roll back.
    fn transfer(&mut self, ledger: &mut Ledger, to: &Address, amount: u64)
        -> Result<(), TransferError>;
}

/// A transport backed by a closure.
pub struct FnTransport<F> {
    f: F,
}

/// Wraps a closure as a [`ValueTransport`].
///
/// ```
/// use custody_contracts::ledger::Ledger;
/// use custody_contracts::transfer::transfer_fn;
/// use custody_protocol::Address;
///
/// let mut ledger = Ledger::new(100, 1000);
/// let alice = Address::repeat_byte(1);
/// ledger.deposit(&alice, 10).unwrap();
///
/// let mut paid = 0;
/// let mut transport = transfer_fn(|_: &mut Ledger, _: &Address, amount: u64| {
///     paid += amount;
///     Ok(())
/// });
/// ledger.withdraw(&alice, 10, &mut transport).unwrap();
/// drop(transport);
/// assert_eq!(paid, 10);
/// ```
pub fn transfer_fn<F>(f: F) -> FnTransport<F>
where
    F: FnMut(&mut Ledger, &Address, u64) -> Result<(), TransferError>,
{
    FnTransport { f }
}

impl<F> ValueTransport for FnTransport<F>
where
    F: FnMut(&mut Ledger, &Address, u64) -> Result<(), TransferError>,
{
    fn transfer(
        &mut self,
        ledger: &mut Ledger,
        to: &Address,
        amount: u64,
    ) -> Result<(), TransferError> {
        (self.f)(ledger, to, amount)
    }
}
