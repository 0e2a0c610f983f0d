//! # External Wallets
//!
//! Native value that lives outside the ledger. Each party has a spendable
//! wallet balance; the custodian holds a single `custody` balance backing
//! everything credited in the ledger.
//!
//! Value flows in two directions:
//!
//! ```text
//! deposit:   wallet[from] --collect--> custody   (then ledger.deposit)
//! withdraw:  custody      --transfer-> wallet[to] (inside ledger.withdraw)
//! ```
//!
//! A party can be marked as rejecting inbound transfers, which makes every
//! withdrawal paid to it fail and roll back.

use custody_protocol::Address;
use std::collections::{HashMap, HashSet};

use crate::ledger::Ledger;
use crate::transfer::{TransferError, ValueTransport};

/// In-memory book of external balances plus the custodian's holdings.
#[derive(Debug, Clone, Default)]
pub struct ExternalWallets {
    wallets: HashMap<Address, u64>,
    custody: u64,
    rejecting: HashSet<Address>,
}

impl ExternalWallets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spendable value held by `account` outside the ledger.
    pub fn balance_of(&self, account: &Address) -> u64 {
        self.wallets.get(account).copied().unwrap_or(0)
    }

    /// Value the custodian currently holds on the ledger's behalf.
    pub fn custody(&self) -> u64 {
        self.custody
    }

    /// Adds fresh value to `account`'s wallet. Returns the new wallet balance.
    pub fn credit(&mut self, account: &Address, amount: u64) -> Result<u64, TransferError> {
        let balance = self
            .balance_of(account)
            .checked_add(amount)
            .ok_or(TransferError::Overflow { account: *account })?;
        self.wallets.insert(*account, balance);
        Ok(balance)
    }

    /// Moves `amount` from `from`'s wallet into custody.
    pub fn collect(&mut self, from: &Address, amount: u64) -> Result<(), TransferError> {
        let available = self.balance_of(from);
        if amount > available {
            return Err(TransferError::InsufficientFunds {
                account: *from,
                requested: amount,
                available,
            });
        }
        let custody = self
            .custody
            .checked_add(amount)
            .ok_or(TransferError::Overflow { account: *from })?;

        self.wallets.insert(*from, available - amount);
        self.custody = custody;
        Ok(())
    }

    /// Returns previously collected value to `to`.
    pub fn refund(&mut self, to: &Address, amount: u64) -> Result<(), TransferError> {
        self.pay_out(to, amount)
    }

    /// Makes every future transfer to `account` fail (or succeed again).
    pub fn reject_transfers_to(&mut self, account: &Address, reject: bool) {
        if reject {
            self.rejecting.insert(*account);
        } else {
            self.rejecting.remove(account);
        }
    }

    pub fn is_rejecting(&self, account: &Address) -> bool {
        self.rejecting.contains(account)
    }

    fn pay_out(&mut self, to: &Address, amount: u64) -> Result<(), TransferError> {
        let custody = self
            .custody
            .checked_sub(amount)
            .ok_or(TransferError::InsufficientCustody {
                requested: amount,
                available: self.custody,
            })?;
        let balance = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(TransferError::Overflow { account: *to })?;

        self.custody = custody;
        self.wallets.insert(*to, balance);
        Ok(())
    }
}

impl ValueTransport for ExternalWallets {
    fn transfer(
        &mut self,
        _ledger: &mut Ledger,
        to: &Address,
        amount: u64,
    ) -> Result<(), TransferError> {
        if self.rejecting.contains(to) {
            return Err(TransferError::Rejected { recipient: *to });
        }
        self.pay_out(to, amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn carol() -> Address {
        Address::repeat_byte(0xC0)
    }

    #[test]
    fn collect_moves_value_into_custody() {
        let mut wallets = ExternalWallets::new();
        wallets.credit(&carol(), 100).unwrap();
        wallets.collect(&carol(), 60).unwrap();

        assert_eq!(wallets.balance_of(&carol()), 40);
        assert_eq!(wallets.custody(), 60);
    }

    #[test]
    fn collect_more_than_wallet_fails() {
        let mut wallets = ExternalWallets::new();
        wallets.credit(&carol(), 10).unwrap();
        assert_eq!(
            wallets.collect(&carol(), 11),
            Err(TransferError::InsufficientFunds {
                account: carol(),
                requested: 11,
                available: 10
            })
        );
        assert_eq!(wallets.custody(), 0);
    }

    #[test]
    fn transfer_pays_out_of_custody() {
        let mut wallets = ExternalWallets::new();
        let mut ledger = Ledger::new(100, 1000);
        wallets.credit(&carol(), 50).unwrap();
        wallets.collect(&carol(), 50).unwrap();

        wallets.transfer(&mut ledger, &carol(), 20).unwrap();
        assert_eq!(wallets.custody(), 30);
        assert_eq!(wallets.balance_of(&carol()), 20);
    }

    #[test]
    fn transfer_beyond_custody_fails() {
        let mut wallets = ExternalWallets::new();
        let mut ledger = Ledger::new(100, 1000);
        assert_eq!(
            wallets.transfer(&mut ledger, &carol(), 1),
            Err(TransferError::InsufficientCustody {
                requested: 1,
                available: 0
            })
        );
    }

    #[test]
    fn rejecting_recipient_fails_transfer() {
        let mut wallets = ExternalWallets::new();
        let mut ledger = Ledger::new(100, 1000);
        wallets.credit(&carol(), 5).unwrap();
        wallets.collect(&carol(), 5).unwrap();
        wallets.reject_transfers_to(&carol(), true);
        assert!(wallets.is_rejecting(&carol()));

        assert_eq!(
            wallets.transfer(&mut ledger, &carol(), 5),
            Err(TransferError::Rejected {
                recipient: carol()
            })
        );
        assert_eq!(wallets.custody(), 5);

        wallets.reject_transfers_to(&carol(), false);
        assert!(wallets.transfer(&mut ledger, &carol(), 5).is_ok());
    }

    #[test]
    fn credit_overflow_detected() {
        let mut wallets = ExternalWallets::new();
        wallets.credit(&carol(), u64::MAX).unwrap();
        assert_eq!(
            wallets.credit(&carol(), 1),
            Err(TransferError::Overflow { account: carol() })
        );
    }
}
