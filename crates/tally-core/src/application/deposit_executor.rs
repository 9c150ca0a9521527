use crate::application::context::SubmissionContext;
use crate::application::poller::IndexingPoller;
use crate::application::redeem_executor::{PositionToRedeem, RedeemExecutor, RedeemOutcome};
use crate::application::transaction::TransactionSender;
use crate::domain::cart::CartItem;
use crate::domain::events::Phase;
use crate::domain::ledger::{DepositBatch, LedgerCall};
use crate::domain::report::{SkipReason, SkippedItem};
use crate::error::{EngineError, LedgerError, LedgerErrorCode};
use crate::types::{Curve, Direction, TermId, TxHash};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Result of the deposit phase
#[derive(Debug, Clone, Default)]
pub struct DepositOutcome {
    /// Withdrawals of blocking for positions made before depositing
    pub blocking_redeem: RedeemOutcome,
    /// Deposit transactions: recovery seed, seed redemption, and the deposit itself
    pub hashes: Vec<TxHash>,
    /// Assets deposited on behalf of the caller, recovery seeds excluded
    pub deposited: u128,
    /// Items left out
    pub skipped: Vec<SkippedItem>,
    /// Whether the counter-vault recovery ran
    pub recovered: bool,
}

/// Items split by curve and direction
#[derive(Debug, Default)]
struct DepositSplit {
    progressive_against: Vec<CartItem>,
    linear_against: Vec<CartItem>,
    others: Vec<CartItem>,
}

impl DepositSplit {
    fn of(items: Vec<CartItem>) -> Self {
        let mut split = DepositSplit::default();
        for item in items {
            match (item.curve, item.direction) {
                (Curve::Progressive, Direction::Against) => split.progressive_against.push(item),
                (Curve::Linear, Direction::Against) => split.linear_against.push(item),
                _ => split.others.push(item),
            }
        }
        split
    }

    fn against(&self) -> Vec<CartItem> {
        self.linear_against
            .iter()
            .chain(self.progressive_against.iter())
            .cloned()
            .collect()
    }

    fn all(&self) -> impl Iterator<Item = &CartItem> {
        self.others
            .iter()
            .chain(self.linear_against.iter())
            .chain(self.progressive_against.iter())
    }
}

/// Deposits onto relationships that exist on the ledger
#[derive(Clone)]
pub struct DepositExecutor {
    sender: TransactionSender,
    redeemer: RedeemExecutor,
    poller: IndexingPoller,
}

impl DepositExecutor {
    /// Create an executor
    pub fn new(sender: TransactionSender, redeemer: RedeemExecutor, poller: IndexingPoller) -> Self {
        Self {
            sender,
            redeemer,
            poller,
        }
    }

    /// Deposit every item in one combined transaction.
    ///
    /// Against items first get any blocking for position withdrawn. If the
    /// ledger refuses to initialise a progressive counter vault, the affected
    /// relationships are seeded on their for side, the seed is withdrawn, and
    /// the deposit is retried once.
    pub async fn deposit(
        &self,
        ctx: &mut SubmissionContext,
        items: Vec<CartItem>,
    ) -> Result<DepositOutcome, EngineError> {
        let mut outcome = DepositOutcome::default();

        let (items, skipped) = self.resolve_counter_ids(ctx, items).await;
        for skip in &skipped {
            ctx.progress.item_skipped(&skip.item_id, skip.reason);
        }
        outcome.skipped = skipped;

        let split = DepositSplit::of(items);
        let against = split.against();
        if !against.is_empty() {
            outcome.blocking_redeem = self
                .redeemer
                .redeem_blocking_for_positions(ctx, &against, Phase::Depositing)
                .await?;
        }

        let batch = self.build_batch(ctx, &split)?;
        if batch.is_empty() {
            info!("Nothing to deposit");
            return Ok(outcome);
        }
        outcome.deposited = batch.total_assets();
        let deposits = batch.len();
        let call = LedgerCall::DepositBatch(batch);

        let first_attempt = self.sender.send(&call, Phase::Depositing, &ctx.progress).await;
        let receipt = match first_attempt {
            Ok(receipt) => receipt,
            Err(e) if e.is(LedgerErrorCode::CounterNotInitializable) && !ctx.recovery_attempted => {
                ctx.recovery_attempted = true;
                outcome.recovered = true;
                let mut recovery_hashes = self.recover_counter_vaults(ctx, &split, e).await?;
                outcome.hashes.append(&mut recovery_hashes);

                info!("Retrying deposit after counter vault recovery");
                self.sender
                    .send(&call, Phase::Depositing, &ctx.progress)
                    .await?
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            deposits,
            assets = %outcome.deposited,
            tx_hash = %receipt.hash,
            "Deposit confirmed"
        );
        outcome.hashes.push(receipt.hash);
        Ok(outcome)
    }

    /// Fill in counter ids the cart did not know, waiting for the indexer
    async fn resolve_counter_ids(
        &self,
        ctx: &SubmissionContext,
        items: Vec<CartItem>,
    ) -> (Vec<CartItem>, Vec<SkippedItem>) {
        let mut resolved = Vec::with_capacity(items.len());
        let mut skipped = Vec::new();

        for item in items {
            let needs_counter =
                item.direction == Direction::Against && item.counter_triple_id.is_none();
            if !needs_counter {
                resolved.push(item);
                continue;
            }

            let Some(object) = item.object_id.clone() else {
                skipped.push(SkippedItem::new(&item.id, SkipReason::CounterIdUnavailable));
                continue;
            };
            match self
                .poller
                .wait_for_relationship(&ctx.subject, &item.predicate_id, &object)
                .await
            {
                Ok(info) => resolved.push(item.with_relationship(info.triple_id, Some(info.counter_triple_id))),
                Err(e) => {
                    warn!(item_id = %item.id, error = %e, "Counter id unavailable, skipping item");
                    skipped.push(SkippedItem::new(&item.id, SkipReason::CounterIdUnavailable));
                }
            }
        }

        (resolved, skipped)
    }

    fn build_batch(
        &self,
        ctx: &SubmissionContext,
        split: &DepositSplit,
    ) -> Result<DepositBatch, EngineError> {
        let mut batch = DepositBatch::new(ctx.account.clone());
        for item in split.all() {
            let term_id = match item.direction {
                Direction::For => item.triple_id.clone(),
                Direction::Against => item.counter_triple_id.clone(),
            };
            let term_id = term_id.ok_or_else(|| EngineError::InvalidItem {
                item_id: item.id.clone(),
                reason: format!("no vault id for a {} deposit", item.direction),
            })?;
            batch.push(term_id, ctx.curve_ids.id_for(item.curve), item.amount);
        }
        Ok(batch)
    }

    /// Seed the for side of every relationship with a progressive against
    /// deposit, then withdraw the seed again
    async fn recover_counter_vaults(
        &self,
        ctx: &SubmissionContext,
        split: &DepositSplit,
        cause: LedgerError,
    ) -> Result<Vec<TxHash>, EngineError> {
        let triples: BTreeSet<TermId> = split
            .progressive_against
            .iter()
            .filter_map(|item| item.triple_id.clone())
            .collect();
        if triples.is_empty() {
            return Err(cause.into());
        }

        warn!(
            relationships = triples.len(),
            "Counter vault not initialisable, seeding for side"
        );
        ctx.progress.recovery_triggered(triples.len());

        let progressive = ctx.curve_ids.id_for(Curve::Progressive);
        let mut seed = DepositBatch::new(ctx.account.clone());
        for triple in &triples {
            seed.push(triple.clone(), progressive, ctx.contract.min_deposit);
        }

        let mut hashes = Vec::new();
        let receipt = self
            .sender
            .send(&LedgerCall::DepositBatch(seed), Phase::Depositing, &ctx.progress)
            .await?;
        hashes.push(receipt.hash);

        let positions: Vec<PositionToRedeem> = triples
            .into_iter()
            .map(|term_id| PositionToRedeem {
                term_id,
                curve: Curve::Progressive,
                direction: Direction::For,
                believed_shares: ctx.contract.min_deposit,
                item_id: None,
            })
            .collect();
        let redeemed = self
            .redeemer
            .redeem_positions(ctx, &positions, Phase::Depositing)
            .await?;
        hashes.extend(redeemed.hash);

        Ok(hashes)
    }
}
