use crate::error::{BustError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;

/// A strictly positive number of credits moved by a single ledger operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CreditAmount(u64);

impl CreditAmount {
    pub const ONE: Self = Self(1);

    pub fn new(value: u64) -> Result<Self> {
        if value > 0 {
            Ok(Self(value))
        } else {
            Err(BustError::ValidationError(
                "Credit amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for CreditAmount {
    type Error = BustError;

    fn try_from(value: u64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CreditAmount> for u64 {
    fn from(amount: CreditAmount) -> Self {
        amount.0
    }
}

/// Identifies a one-shot credit grant, e.g. the grant tied to a payment.
///
/// A grant key is applied to a balance at most once; storage keeps the set of
/// applied keys next to the balances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrantKey(String);

impl GrantKey {
    pub fn for_payment(external_payment_id: &str) -> Self {
        Self(format!("payment:{external_payment_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Result of applying a keyed grant.
#[derive(Debug, Clone, PartialEq)]
pub enum GrantOutcome {
    Applied(CreditAccount),
    AlreadyApplied,
}

/// The spendable balance of a user plus its audit counters.
///
/// `credits == total_earned - total_spent` holds after every mutation.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct CreditAccount {
    pub user_id: UserId,
    pub credits: u64,
    pub total_earned: u64,
    pub total_spent: u64,
}

impl CreditAccount {
    /// Opens an account funded with the sign-up grant.
    pub fn open(user_id: UserId, starting_grant: u64) -> Self {
        Self {
            user_id,
            credits: starting_grant,
            total_earned: starting_grant,
            total_spent: 0,
        }
    }

    /// Adds credits to the balance and the earned counter.
    pub fn earn(&mut self, amount: CreditAmount) -> Result<()> {
        let credits = self.credits.checked_add(amount.value());
        let earned = self.total_earned.checked_add(amount.value());
        match (credits, earned) {
            (Some(credits), Some(earned)) => {
                self.credits = credits;
                self.total_earned = earned;
                Ok(())
            }
            _ => Err(BustError::ValidationError(
                "Credit balance overflow".to_string(),
            )),
        }
    }

    /// Removes credits if the balance covers them. Never clamps.
    pub fn spend(&mut self, amount: CreditAmount) -> Result<()> {
        if self.credits < amount.value() {
            return Err(BustError::InsufficientCredits {
                available: self.credits,
                requested: amount.value(),
            });
        }
        self.credits -= amount.value();
        self.total_spent += amount.value();
        Ok(())
    }

    pub fn is_balanced(&self) -> bool {
        self.total_earned.checked_sub(self.total_spent) == Some(self.credits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_amount_validation() {
        assert!(CreditAmount::new(1).is_ok());
        assert!(matches!(
            CreditAmount::new(0),
            Err(BustError::ValidationError(_))
        ));
    }

    #[test]
    fn test_open_account_is_balanced() {
        let account = CreditAccount::open(Uuid::new_v4(), 5);
        assert_eq!(account.credits, 5);
        assert_eq!(account.total_earned, 5);
        assert!(account.is_balanced());
    }

    #[test]
    fn test_spend_success() {
        let mut account = CreditAccount::open(Uuid::new_v4(), 5);
        account.spend(CreditAmount::ONE).unwrap();
        assert_eq!(account.credits, 4);
        assert_eq!(account.total_spent, 1);
        assert!(account.is_balanced());
    }

    #[test]
    fn test_spend_insufficient() {
        let mut account = CreditAccount::open(Uuid::new_v4(), 1);
        let result = account.spend(CreditAmount::new(2).unwrap());
        assert!(matches!(
            result,
            Err(BustError::InsufficientCredits {
                available: 1,
                requested: 2
            })
        ));
        assert_eq!(account.credits, 1);
        assert_eq!(account.total_spent, 0);
    }

    #[test]
    fn test_earn_updates_counters() {
        let mut account = CreditAccount::open(Uuid::new_v4(), 0);
        account.earn(CreditAmount::new(150).unwrap()).unwrap();
        assert_eq!(account.credits, 150);
        assert_eq!(account.total_earned, 150);
        assert!(account.is_balanced());
    }

    #[test]
    fn test_earn_overflow_rejected() {
        let mut account = CreditAccount::open(Uuid::new_v4(), u64::MAX);
        assert!(account.earn(CreditAmount::ONE).is_err());
        assert_eq!(account.credits, u64::MAX);
    }

    #[test]
    fn test_payment_grant_key() {
        assert_eq!(GrantKey::for_payment("pi_1").as_str(), "payment:pi_1");
    }
}
