use crate::application::context::SubmissionContext;
use crate::application::transaction::TransactionSender;
use crate::domain::cart::CartItem;
use crate::domain::events::Phase;
use crate::domain::ledger::{Ledger, LedgerCall, RedeemBatch};
use crate::error::EngineError;
use crate::types::{Curve, Direction, TermId, TxHash};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A position the caller wants withdrawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionToRedeem {
    /// Vault term: the relationship id for a for position, its counter id for
    /// an against position
    pub term_id: TermId,
    /// Curve of the vault
    pub curve: Curve,
    /// Side the position sits on
    pub direction: Direction,
    /// Shares the caller believes it holds; the ledger balance wins
    pub believed_shares: u128,
    /// Cart item that asked for the redemption
    pub item_id: Option<String>,
}

/// Result of a redemption
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedeemOutcome {
    /// Transaction hash, `None` when every balance was zero
    pub hash: Option<TxHash>,
    /// Positions actually withdrawn, with their ledger balance as `believed_shares`
    pub redeemed: Vec<PositionToRedeem>,
    /// Shares withdrawn in total
    pub total_shares: u128,
}

/// Opposing positions blocking the deposits of `items`
pub fn positions_from_items(items: &[CartItem]) -> Vec<PositionToRedeem> {
    items
        .iter()
        .filter_map(|item| {
            let position = item.blocking_position()?;
            let term_id = match position.direction {
                Direction::For => item.triple_id.clone(),
                Direction::Against => item.counter_triple_id.clone(),
            };
            match term_id {
                Some(term_id) => Some(PositionToRedeem {
                    term_id,
                    curve: position.curve,
                    direction: position.direction,
                    believed_shares: position.shares,
                    item_id: Some(item.id.clone()),
                }),
                None => {
                    warn!(item_id = %item.id, "Opposing position has no vault id, not redeeming");
                    None
                }
            }
        })
        .collect()
}

/// Withdraws existing positions in one combined transaction
#[derive(Clone)]
pub struct RedeemExecutor {
    ledger: Arc<dyn Ledger>,
    sender: TransactionSender,
}

impl RedeemExecutor {
    /// Create an executor
    pub fn new(ledger: Arc<dyn Ledger>, sender: TransactionSender) -> Self {
        Self { ledger, sender }
    }

    /// Re-read the ledger balance of every position and withdraw the non-zero
    /// ones in a single transaction.
    pub async fn redeem_positions(
        &self,
        ctx: &SubmissionContext,
        positions: &[PositionToRedeem],
        phase: Phase,
    ) -> Result<RedeemOutcome, EngineError> {
        // the same vault may be listed by several items
        let mut seen = HashSet::new();
        let unique: Vec<&PositionToRedeem> = positions
            .iter()
            .filter(|p| seen.insert((p.term_id.clone(), p.curve)))
            .collect();

        if unique.is_empty() {
            return Ok(RedeemOutcome::default());
        }

        let reads = unique.iter().map(|position| {
            let curve_id = ctx.curve_ids.id_for(position.curve);
            self.ledger
                .share_balance(&ctx.account, &position.term_id, curve_id)
        });
        let balances = join_all(reads).await;

        let mut batch = RedeemBatch::new(ctx.account.clone());
        let mut redeemed = Vec::new();
        for (position, balance) in unique.into_iter().zip(balances) {
            let shares = balance?;
            if shares == 0 {
                debug!(
                    term_id = %position.term_id,
                    curve = %position.curve,
                    believed = %position.believed_shares,
                    "No shares on the ledger, skipping"
                );
                continue;
            }
            if shares != position.believed_shares {
                debug!(
                    term_id = %position.term_id,
                    believed = %position.believed_shares,
                    actual = %shares,
                    "Using ledger balance"
                );
            }
            batch.push(
                position.term_id.clone(),
                ctx.curve_ids.id_for(position.curve),
                shares,
            );
            redeemed.push(PositionToRedeem {
                believed_shares: shares,
                ..position.clone()
            });
        }

        if batch.is_empty() {
            info!("Nothing to redeem after balance check");
            return Ok(RedeemOutcome::default());
        }

        let total_shares = batch.total_shares();
        let receipt = self
            .sender
            .send(&LedgerCall::RedeemBatch(batch), phase, &ctx.progress)
            .await?;

        info!(
            positions = redeemed.len(),
            shares = %total_shares,
            tx_hash = %receipt.hash,
            "Positions redeemed"
        );

        Ok(RedeemOutcome {
            hash: Some(receipt.hash),
            redeemed,
            total_shares,
        })
    }

    /// Withdraw any for position held on the vaults that against `items` are
    /// about to deposit into. The ledger refuses a deposit on one side while
    /// the caller holds the other.
    pub async fn redeem_blocking_for_positions(
        &self,
        ctx: &SubmissionContext,
        items: &[CartItem],
        phase: Phase,
    ) -> Result<RedeemOutcome, EngineError> {
        let positions: Vec<PositionToRedeem> = items
            .iter()
            .filter(|item| item.direction == Direction::Against)
            .filter_map(|item| {
                let term_id = item.triple_id.clone()?;
                let believed_shares = item
                    .opposing_position
                    .as_ref()
                    .filter(|p| p.direction == Direction::For && p.curve == item.curve)
                    .map(|p| p.shares)
                    .unwrap_or(0);
                Some(PositionToRedeem {
                    term_id,
                    curve: item.curve,
                    direction: Direction::For,
                    believed_shares,
                    item_id: Some(item.id.clone()),
                })
            })
            .collect();

        self.redeem_positions(ctx, &positions, phase).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{existing_item, reporter, MockTestLedger, CONTRACT};
    use crate::domain::cart::OpposingPosition;
    use crate::domain::ledger::{ReceiptStatus, TxReceipt};
    use crate::types::{Address, CurveIds};
    use parking_lot::Mutex;

    fn context() -> SubmissionContext {
        let (progress, _events, _status) = reporter();
        SubmissionContext::new(
            Address::new("0xme"),
            TermId::new("0xsubject"),
            CONTRACT,
            CurveIds::default(),
            progress,
        )
    }

    fn ledger_with_balances(
        balances: &'static [(&'static str, u128)],
        calls: Arc<Mutex<Vec<LedgerCall>>>,
    ) -> MockTestLedger {
        let mut ledger = MockTestLedger::new();
        ledger.expect_share_balance().returning(move |_, term, _| {
            Ok(balances
                .iter()
                .find(|(t, _)| *t == term.as_str())
                .map(|(_, b)| *b)
                .unwrap_or(0))
        });
        ledger.expect_simulate().returning(|_| Ok(()));
        ledger.expect_submit().returning(move |call| {
            calls.lock().push(call.clone());
            Ok(TxHash::new("0xredeem"))
        });
        ledger.expect_wait_for_receipt().returning(|hash| {
            Ok(TxReceipt {
                hash: hash.clone(),
                status: ReceiptStatus::Success,
                created_terms: vec![],
            })
        });
        ledger
    }

    fn position(term: &str, believed: u128) -> PositionToRedeem {
        PositionToRedeem {
            term_id: TermId::new(term),
            curve: Curve::Linear,
            direction: Direction::For,
            believed_shares: believed,
            item_id: None,
        }
    }

    #[test]
    fn test_positions_from_items_pick_the_held_side() {
        let mut switch_to_against = existing_item("a", "0xt1", Direction::Against, Curve::Linear, 100);
        switch_to_against.opposing_position = Some(OpposingPosition {
            direction: Direction::For,
            shares: 50,
            curve: Curve::Progressive,
        });
        let mut switch_to_for = existing_item("b", "0xt2", Direction::For, Curve::Linear, 100);
        switch_to_for.opposing_position = Some(OpposingPosition {
            direction: Direction::Against,
            shares: 7,
            curve: Curve::Linear,
        });
        let untouched = existing_item("c", "0xt3", Direction::For, Curve::Linear, 100);

        let positions = positions_from_items(&[switch_to_against, switch_to_for, untouched]);

        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].term_id, TermId::new("0xt1"));
        assert_eq!(positions[0].curve, Curve::Progressive);
        assert_eq!(positions[1].term_id, TermId::new("0xt2-counter"));
        assert_eq!(positions[1].direction, Direction::Against);
    }

    #[tokio::test]
    async fn test_zero_balances_are_skipped_and_ledger_balance_wins() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let ledger = ledger_with_balances(&[("0xstale", 0), ("0xheld", 42)], calls.clone());
        let ledger: Arc<dyn Ledger> = Arc::new(ledger);
        let executor = RedeemExecutor::new(ledger.clone(), TransactionSender::new(ledger));

        let outcome = executor
            .redeem_positions(
                &context(),
                &[position("0xstale", 10), position("0xheld", 40)],
                Phase::Redeeming,
            )
            .await
            .unwrap();

        assert_eq!(outcome.hash, Some(TxHash::new("0xredeem")));
        assert_eq!(outcome.total_shares, 42);
        let calls = calls.lock();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            LedgerCall::RedeemBatch(batch) => {
                assert_eq!(batch.term_ids, vec![TermId::new("0xheld")]);
                assert_eq!(batch.shares, vec![42]);
                assert_eq!(batch.receiver, Address::new("0xme"));
            }
            other => panic!("Expected RedeemBatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_all_zero_sends_nothing() {
        let mut ledger = MockTestLedger::new();
        ledger.expect_share_balance().returning(|_, _, _| Ok(0));
        ledger.expect_submit().never();
        let ledger: Arc<dyn Ledger> = Arc::new(ledger);
        let executor = RedeemExecutor::new(ledger.clone(), TransactionSender::new(ledger));

        let outcome = executor
            .redeem_positions(&context(), &[position("0xa", 5)], Phase::Redeeming)
            .await
            .unwrap();

        assert_eq!(outcome, RedeemOutcome::default());
    }

    #[tokio::test]
    async fn test_blocking_for_positions_only_for_against_items() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let ledger = ledger_with_balances(&[("0xt1", 9), ("0xt2", 3)], calls.clone());
        let ledger: Arc<dyn Ledger> = Arc::new(ledger);
        let executor = RedeemExecutor::new(ledger.clone(), TransactionSender::new(ledger));

        let items = vec![
            existing_item("against", "0xt1", Direction::Against, Curve::Progressive, 100),
            existing_item("for", "0xt2", Direction::For, Curve::Linear, 100),
        ];

        let outcome = executor
            .redeem_blocking_for_positions(&context(), &items, Phase::Depositing)
            .await
            .unwrap();

        assert_eq!(outcome.redeemed.len(), 1);
        assert_eq!(outcome.redeemed[0].term_id, TermId::new("0xt1"));
        assert_eq!(outcome.redeemed[0].curve, Curve::Progressive);
        assert_eq!(outcome.total_shares, 9);
    }
}
