//! Account kinds and their transaction-validity predicates.
//!
//! All kinds share the `{balance, nonce}` contract; they differ only in how
//! much of the balance is spendable at a given block height. Dispatch is by
//! pattern matching on the enum, never by trait objects.

use crate::error::ChainError;
use serde::{Deserialize, Serialize};

/// Tagged union over the supported account kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Account {
    Basic(BasicAccount),
    Vesting(VestingAccount),
    Htlc(HtlcAccount),
}

/// A classic account that can send all of its funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BasicAccount {
    pub balance: u64,
    pub nonce: u32,
}

/// An account releasing its initial amount in linear steps. Outgoing
/// transactions may only spend the already-vested part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VestingAccount {
    pub balance: u64,
    pub nonce: u32,
    pub vesting_start: u32,
    pub vesting_step_blocks: u32,
    pub vesting_step_amount: u64,
    pub vesting_total: u64,
}

/// A hashed time-locked account: funds are frozen until the timeout height,
/// after which the owner can spend freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtlcAccount {
    pub balance: u64,
    pub nonce: u32,
    pub timeout: u32,
}

impl Default for Account {
    fn default() -> Self {
        Account::Basic(BasicAccount::default())
    }
}

impl Account {
    pub fn basic(balance: u64, nonce: u32) -> Self {
        Account::Basic(BasicAccount { balance, nonce })
    }

    pub fn balance(&self) -> u64 {
        match self {
            Account::Basic(a) => a.balance,
            Account::Vesting(a) => a.balance,
            Account::Htlc(a) => a.balance,
        }
    }

    pub fn nonce(&self) -> u32 {
        match self {
            Account::Basic(a) => a.nonce,
            Account::Vesting(a) => a.nonce,
            Account::Htlc(a) => a.nonce,
        }
    }

    /// An account equal to the initial state is treated as nonexistent and
    /// pruned from the accounts tree.
    pub fn is_initial(&self) -> bool {
        matches!(self, Account::Basic(a) if a.balance == 0 && a.nonce == 0)
    }

    fn with_balance_nonce(&self, balance: u64, nonce: u32) -> Account {
        match *self {
            Account::Basic(_) => Account::Basic(BasicAccount { balance, nonce }),
            Account::Vesting(a) => Account::Vesting(VestingAccount { balance, nonce, ..a }),
            Account::Htlc(a) => Account::Htlc(HtlcAccount { balance, nonce, ..a }),
        }
    }

    /// The part of the balance that must remain untouched at `height`.
    fn locked_balance(&self, height: u32) -> u64 {
        match self {
            Account::Basic(_) => 0,
            Account::Vesting(a) => {
                if a.vesting_step_blocks == 0 {
                    return 0;
                }
                let elapsed = height.saturating_sub(a.vesting_start);
                let released =
                    (elapsed / a.vesting_step_blocks) as u64 * a.vesting_step_amount;
                a.vesting_total.saturating_sub(released)
            }
            Account::Htlc(a) => {
                if height >= a.timeout {
                    0
                } else {
                    a.balance
                }
            }
        }
    }

    /// Check whether this account may spend `amount` (value + fee) at the
    /// given block height.
    pub fn can_spend(&self, amount: u64, height: u32) -> bool {
        let balance = self.balance();
        balance >= amount && balance - amount >= self.locked_balance(height)
    }

    /// Debit `amount` and bump the nonce. Fails without mutating anything if
    /// the kind's validity predicate rejects the spend.
    pub fn apply_outgoing(&self, amount: u64, height: u32) -> Result<Account, ChainError> {
        if !self.can_spend(amount, height) {
            return Err(ChainError::InvalidTransaction(format!(
                "Insufficient spendable funds: balance {} (locked {}), needed {}",
                self.balance(),
                self.locked_balance(height),
                amount
            )));
        }
        Ok(self.with_balance_nonce(self.balance() - amount, self.nonce() + 1))
    }

    /// Undo a previous `apply_outgoing`.
    pub fn revert_outgoing(&self, amount: u64) -> Result<Account, ChainError> {
        if self.nonce() == 0 {
            return Err(ChainError::InvalidTransaction(
                "Cannot revert outgoing transaction on account with nonce 0".to_string(),
            ));
        }
        let balance = self.balance().checked_add(amount).ok_or_else(|| {
            ChainError::InvalidTransaction("Balance overflow on revert".to_string())
        })?;
        Ok(self.with_balance_nonce(balance, self.nonce() - 1))
    }

    /// Credit `value` to the account.
    pub fn apply_incoming(&self, value: u64) -> Result<Account, ChainError> {
        let balance = self.balance().checked_add(value).ok_or_else(|| {
            ChainError::InvalidTransaction("Balance overflow".to_string())
        })?;
        Ok(self.with_balance_nonce(balance, self.nonce()))
    }

    /// Undo a previous `apply_incoming`.
    pub fn revert_incoming(&self, value: u64) -> Result<Account, ChainError> {
        let balance = self.balance().checked_sub(value).ok_or_else(|| {
            ChainError::InvalidTransaction(
                "Balance underflow on incoming revert".to_string(),
            )
        })?;
        Ok(self.with_balance_nonce(balance, self.nonce()))
    }

    /// Canonical byte layout used for tree-node hashing. Must be identical
    /// across all implementations: type tag, then all fields big-endian.
    pub fn serialize_content(&self, out: &mut Vec<u8>) {
        match self {
            Account::Basic(a) => {
                out.push(0x00);
                out.extend_from_slice(&a.balance.to_be_bytes());
                out.extend_from_slice(&a.nonce.to_be_bytes());
            }
            Account::Vesting(a) => {
                out.push(0x01);
                out.extend_from_slice(&a.balance.to_be_bytes());
                out.extend_from_slice(&a.nonce.to_be_bytes());
                out.extend_from_slice(&a.vesting_start.to_be_bytes());
                out.extend_from_slice(&a.vesting_step_blocks.to_be_bytes());
                out.extend_from_slice(&a.vesting_step_amount.to_be_bytes());
                out.extend_from_slice(&a.vesting_total.to_be_bytes());
            }
            Account::Htlc(a) => {
                out.push(0x02);
                out.extend_from_slice(&a.balance.to_be_bytes());
                out.extend_from_slice(&a.nonce.to_be_bytes());
                out.extend_from_slice(&a.timeout.to_be_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_initial() {
        assert!(Account::default().is_initial());
        assert!(!Account::basic(1, 0).is_initial());
        assert!(!Account::basic(0, 1).is_initial());
    }

    #[test]
    fn test_basic_outgoing_bumps_nonce() {
        let account = Account::basic(100, 0);
        let after = account.apply_outgoing(60, 1).unwrap();
        assert_eq!(after.balance(), 40);
        assert_eq!(after.nonce(), 1);

        let reverted = after.revert_outgoing(60).unwrap();
        assert_eq!(reverted, account);
    }

    #[test]
    fn test_basic_rejects_overspend() {
        let account = Account::basic(100, 0);
        assert!(account.apply_outgoing(101, 1).is_err());
        // No partial state: the original is untouched.
        assert_eq!(account.balance(), 100);
    }

    #[test]
    fn test_incoming_round_trip() {
        let account = Account::basic(10, 3);
        let after = account.apply_incoming(5).unwrap();
        assert_eq!(after.balance(), 15);
        assert_eq!(after.nonce(), 3);
        assert_eq!(after.revert_incoming(5).unwrap(), account);
    }

    #[test]
    fn test_vesting_locks_unreleased_funds() {
        let account = Account::Vesting(VestingAccount {
            balance: 1000,
            nonce: 0,
            vesting_start: 0,
            vesting_step_blocks: 10,
            vesting_step_amount: 100,
            vesting_total: 1000,
        });

        // At height 10 only one step (100) has vested.
        assert!(account.can_spend(100, 10));
        assert!(!account.can_spend(101, 10));
        // After all steps released everything is spendable.
        assert!(account.can_spend(1000, 100));
    }

    #[test]
    fn test_htlc_locked_until_timeout() {
        let account = Account::Htlc(HtlcAccount {
            balance: 500,
            nonce: 0,
            timeout: 50,
        });
        assert!(!account.can_spend(1, 49));
        assert!(account.can_spend(500, 50));
    }

    #[test]
    fn test_serialize_content_differs_by_kind() {
        let mut basic = Vec::new();
        Account::basic(5, 0).serialize_content(&mut basic);
        let mut htlc = Vec::new();
        Account::Htlc(HtlcAccount {
            balance: 5,
            nonce: 0,
            timeout: 0,
        })
        .serialize_content(&mut htlc);
        assert_ne!(basic, htlc);
    }
}
