//! Per-user token balances and the debit pass that charges allocation
//! results.

use {
    super::{Tokens, UserId, auction::AllocationResult},
    serde::Serialize,
};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("user {user} has {balance} tokens but {requested} are required")]
    InsufficientBalance {
        user: UserId,
        balance: Tokens,
        requested: Tokens,
    },
    #[error("user {0} has no account")]
    UnknownAccount(UserId),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Integer balance store. Balances never become negative.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Ledger: Send + Sync {
    async fn balance(&self, user: UserId) -> Result<Tokens, LedgerError>;

    /// Removes `amount` from the balance and returns the new balance. Fails
    /// without touching the balance if it doesn't cover `amount`.
    async fn debit(&self, user: UserId, amount: Tokens) -> Result<Tokens, LedgerError>;

    /// Adds `amount` to the balance and returns the new balance.
    async fn credit(&self, user: UserId, amount: Tokens) -> Result<Tokens, LedgerError>;
}

/// A debit that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDebit {
    pub user: UserId,
    pub amount: Tokens,
    pub reason: String,
}

/// Outcome of charging all results of a round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DebitReport {
    /// Winners whose price was taken from their balance.
    pub charged: Vec<UserId>,
    pub failed: Vec<FailedDebit>,
}

/// Charges every result its price, one after the other.
///
/// Failures don't abort the pass and don't undo the allocation: the user is
/// recorded in [`DebitReport::failed`] and keeps the allocated target.
pub async fn settle(ledger: &dyn Ledger, results: &[AllocationResult]) -> DebitReport {
    let mut report = DebitReport::default();
    for result in results {
        match ledger.debit(result.winner, result.price).await {
            Ok(balance) => {
                tracing::debug!(
                    user = %result.winner,
                    price = result.price,
                    balance,
                    "charged allocation"
                );
                report.charged.push(result.winner);
            }
            Err(err) => {
                tracing::warn!(
                    user = %result.winner,
                    price = result.price,
                    ?err,
                    "failed to charge allocation; keeping the allocation"
                );
                report.failed.push(FailedDebit {
                    user: result.winner,
                    amount: result.price,
                    reason: err.to_string(),
                });
            }
        }
    }
    report
}

/// Gives back the price of every charged result.
pub async fn refund(ledger: &dyn Ledger, results: &[AllocationResult]) {
    for result in results.iter().filter(|result| result.charged) {
        if let Err(err) = ledger.credit(result.winner, result.price).await {
            tracing::warn!(
                user = %result.winner,
                price = result.price,
                ?err,
                "failed to refund allocation"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::domain::{
            ResourceId,
            RoundId,
            auction::Method,
            bid::Target,
        },
        mockall::predicate::eq,
    };

    fn result(winner: i64, price: Tokens, charged: bool) -> AllocationResult {
        AllocationResult {
            round: RoundId(1),
            winner: UserId(winner),
            target: Target::Resource(ResourceId(winner)),
            price,
            method: Method::Won,
            charged,
        }
    }

    #[tokio::test]
    async fn failed_debits_are_collected_not_fatal() {
        let mut ledger = MockLedger::new();
        ledger
            .expect_debit()
            .with(eq(UserId(1)), eq(100))
            .times(1)
            .returning(|_, _| Ok(0));
        ledger
            .expect_debit()
            .with(eq(UserId(2)), eq(80))
            .times(1)
            .returning(|user, requested| {
                Err(LedgerError::InsufficientBalance {
                    user,
                    balance: 10,
                    requested,
                })
            });
        ledger
            .expect_debit()
            .with(eq(UserId(3)), eq(0))
            .times(1)
            .returning(|_, _| Ok(5));

        let report = settle(
            &ledger,
            &[result(1, 100, false), result(2, 80, false), result(3, 0, false)],
        )
        .await;

        assert_eq!(report.charged, [UserId(1), UserId(3)]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].user, UserId(2));
        assert_eq!(report.failed[0].amount, 80);
    }

    #[tokio::test]
    async fn refunds_only_charged_results() {
        let mut ledger = MockLedger::new();
        ledger
            .expect_credit()
            .with(eq(UserId(1)), eq(100))
            .times(1)
            .returning(|_, amount| Ok(amount));

        refund(&ledger, &[result(1, 100, true), result(2, 80, false)]).await;
    }
}
