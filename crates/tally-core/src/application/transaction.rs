use crate::application::progress::ProgressReporter;
use crate::domain::events::Phase;
use crate::domain::ledger::{Ledger, LedgerCall, ReceiptStatus, TxReceipt};
use crate::error::LedgerError;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sends ledger writes one at a time: simulate, submit, wait for the receipt.
///
/// A reverted receipt is turned into a classified [`LedgerError`], so callers
/// see the same error codes whether the failure surfaced during simulation or
/// after mining.
#[derive(Clone)]
pub struct TransactionSender {
    ledger: Arc<dyn Ledger>,
}

impl TransactionSender {
    /// Create a sender over a ledger
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Send a write and wait for it to be mined successfully
    pub async fn send(
        &self,
        call: &LedgerCall,
        phase: Phase,
        progress: &ProgressReporter,
    ) -> Result<TxReceipt, LedgerError> {
        let kind = call.kind();
        debug!(call = kind, phase = %phase, value = %call.value(), "Simulating transaction");

        if let Err(e) = self.ledger.simulate(call).await {
            warn!(call = kind, code = %e.code, error = %e.message, "Simulation failed");
            return Err(e);
        }

        let hash = self.ledger.submit(call).await?;
        debug!(call = kind, tx_hash = %hash, "Transaction submitted");

        let receipt = self.ledger.wait_for_receipt(&hash).await?;
        match &receipt.status {
            ReceiptStatus::Success => {
                info!(call = kind, phase = %phase, tx_hash = %hash, "Transaction confirmed");
                progress.transaction_confirmed(phase, kind, &hash);
                Ok(receipt)
            }
            ReceiptStatus::Reverted(reason) => {
                warn!(call = kind, tx_hash = %hash, reason = %reason, "Transaction reverted");
                Err(LedgerError::from_raw(reason.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{reporter, MockTestLedger};
    use crate::domain::events::ExecutionStatus;
    use crate::domain::ledger::CreateObjects;
    use crate::error::LedgerErrorCode;
    use crate::types::TxHash;
    use mockall::predicate::*;

    fn call() -> LedgerCall {
        LedgerCall::CreateObjects(CreateObjects {
            labels: vec!["Ferris".to_string()],
            assets: vec![10],
        })
    }

    #[tokio::test]
    async fn test_send_runs_simulate_submit_receipt_in_order() {
        let mut ledger = MockTestLedger::new();
        let mut seq = mockall::Sequence::new();
        ledger
            .expect_simulate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        ledger
            .expect_submit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(TxHash::new("0xabc")));
        ledger
            .expect_wait_for_receipt()
            .with(eq(TxHash::new("0xabc")))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|hash| {
                Ok(TxReceipt {
                    hash: hash.clone(),
                    status: ReceiptStatus::Success,
                    created_terms: vec![],
                })
            });

        let (progress, _events, status) = reporter();
        let sender = TransactionSender::new(Arc::new(ledger));

        let receipt = sender
            .send(&call(), Phase::CreatingObjects, &progress)
            .await
            .unwrap();

        assert_eq!(receipt.hash, TxHash::new("0xabc"));
        let snapshot: ExecutionStatus = status.borrow().clone();
        assert_eq!(snapshot.transactions_confirmed, 1);
    }

    #[tokio::test]
    async fn test_simulation_failure_never_submits() {
        let mut ledger = MockTestLedger::new();
        ledger.expect_simulate().returning(|_| {
            Err(LedgerError::from_raw(
                "execution reverted: MultiVault_CannotDirectlyInitializeCounterTriple()",
            ))
        });
        ledger.expect_submit().never();

        let (progress, _events, _status) = reporter();
        let sender = TransactionSender::new(Arc::new(ledger));

        let err = sender
            .send(&call(), Phase::Depositing, &progress)
            .await
            .unwrap_err();
        assert!(err.is(LedgerErrorCode::CounterNotInitializable));
    }

    #[tokio::test]
    async fn test_reverted_receipt_is_classified() {
        let mut ledger = MockTestLedger::new();
        ledger.expect_simulate().returning(|_| Ok(()));
        ledger
            .expect_submit()
            .returning(|_| Ok(TxHash::new("0xdead")));
        ledger.expect_wait_for_receipt().returning(|hash| {
            Ok(TxReceipt {
                hash: hash.clone(),
                status: ReceiptStatus::Reverted("execution reverted: MultiVault_AtomExists".to_string()),
                created_terms: vec![],
            })
        });

        let (progress, _events, status) = reporter();
        let sender = TransactionSender::new(Arc::new(ledger));

        let err = sender
            .send(&call(), Phase::CreatingObjects, &progress)
            .await
            .unwrap_err();
        assert!(err.is(LedgerErrorCode::TermAlreadyExists));
        assert_eq!(status.borrow().transactions_confirmed, 0);
    }
}
