//! The protected resource: a bank account balance.
//!
//! Withdrawals use a compare-and-retry loop so the check-and-decrement is
//! atomic even if a misbehaving caller bypasses the arbitration layer; the
//! balance can never be driven negative.

use std::sync::atomic::{AtomicI64, Ordering};

/// Shared bank account with an atomic balance.
#[derive(Debug)]
pub struct BankAccount {
    balance: AtomicI64,
}

impl BankAccount {
    pub fn new(initial_balance: i64) -> Self {
        BankAccount {
            balance: AtomicI64::new(initial_balance),
        }
    }

    /// Current balance.
    pub fn balance(&self) -> i64 {
        self.balance.load(Ordering::SeqCst)
    }

    /// Add `amount` and return the new balance. Always succeeds.
    pub fn deposit(&self, amount: i64) -> i64 {
        self.balance.fetch_add(amount, Ordering::SeqCst) + amount
    }

    /// Withdraw `amount` if covered.
    ///
    /// Returns `Ok(new_balance)` on success, `Err(current_balance)` when the
    /// balance is insufficient.
    pub fn try_withdraw(&self, amount: i64) -> Result<i64, i64> {
        let mut current = self.balance.load(Ordering::SeqCst);
        loop {
            if current < amount {
                return Err(current);
            }
            match self.balance.compare_exchange(
                current,
                current - amount,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(current - amount),
                Err(observed) => current = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_deposit_and_withdraw() {
        let account = BankAccount::new(100_000);

        assert_eq!(account.try_withdraw(500), Ok(99_500));
        assert_eq!(account.deposit(500), 100_000);
        assert_eq!(account.balance(), 100_000);
    }

    #[test]
    fn test_withdraw_insufficient_leaves_balance() {
        let account = BankAccount::new(100_000);

        assert_eq!(account.try_withdraw(150_000), Err(100_000));
        assert_eq!(account.balance(), 100_000);
    }

    #[test]
    fn test_concurrent_withdraws_never_go_negative() {
        // 8 threads each trying 100 withdrawals of 7: demand far exceeds
        // the balance, so most must fail, and the balance must stay >= 0.
        let account = Arc::new(BankAccount::new(1_000));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let account = account.clone();
                thread::spawn(move || {
                    let mut succeeded = 0u32;
                    for _ in 0..100 {
                        if account.try_withdraw(7).is_ok() {
                            succeeded += 1;
                        }
                    }
                    succeeded
                })
            })
            .collect();

        let total_succeeded: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert!(account.balance() >= 0);
        assert_eq!(
            account.balance(),
            1_000 - 7 * total_succeeded as i64,
            "every successful withdrawal must be accounted for exactly once"
        );
    }
}
