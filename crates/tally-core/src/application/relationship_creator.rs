use crate::application::context::SubmissionContext;
use crate::application::poller::IndexingPoller;
use crate::application::transaction::TransactionSender;
use crate::domain::cart::{CartItem, TripleKey};
use crate::domain::classifier::{group_by_triple, CurveMix, TripleGroup};
use crate::domain::events::Phase;
use crate::domain::ledger::{CreateRelationships, DepositBatch, LedgerCall};
use crate::domain::report::{SkipReason, SkippedItem};
use crate::error::EngineError;
use crate::types::{Direction, TxHash};
use futures::future::join_all;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// How the user's amount reaches a relationship created in this submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositMode {
    /// The creation itself carries the full amount
    Inline,
    /// The creation carries only its cost; deposits follow once ids resolve
    Deferred,
}

impl DepositMode {
    /// Mode for the items of one relationship.
    ///
    /// Creation deposits land on the linear curve, so only a lone linear for
    /// vote can ride along with the creation.
    pub fn for_group(mix: CurveMix, items: &[CartItem]) -> Self {
        match (mix, items) {
            (CurveMix::LinearOnly, [only]) if only.direction == Direction::For => DepositMode::Inline,
            _ => DepositMode::Deferred,
        }
    }
}

/// Result of the relationship phase
#[derive(Debug, Clone, Default)]
pub struct RelationshipOutcome {
    /// Items whose relationship turned out to exist already; they go to the
    /// deposit phase with their ids filled in
    pub rerouted: Vec<CartItem>,
    /// Relationships created
    pub created: usize,
    /// Creation and deferred deposit transactions
    pub hashes: Vec<TxHash>,
    /// Assets sent: creation values plus deferred deposits
    pub deposited: u128,
    /// Items left out
    pub skipped: Vec<SkippedItem>,
}

struct PlannedRelationship {
    key: TripleKey,
    mode: DepositMode,
    items: Vec<CartItem>,
}

/// Creates missing relationships in one transaction, then deposits on the
/// ones that could not take their deposit inline
#[derive(Clone)]
pub struct RelationshipCreator {
    sender: TransactionSender,
    poller: IndexingPoller,
}

impl RelationshipCreator {
    /// Create a creator
    pub fn new(sender: TransactionSender, poller: IndexingPoller) -> Self {
        Self { sender, poller }
    }

    /// Create the relationships targeted by `items`. Every item's object must
    /// exist.
    pub async fn create_relationships(
        &self,
        ctx: &SubmissionContext,
        items: Vec<CartItem>,
    ) -> Result<RelationshipOutcome, EngineError> {
        let mut outcome = RelationshipOutcome::default();

        let mut votes = Vec::with_capacity(items.len());
        for item in items {
            if item.direction == Direction::Against {
                warn!(item_id = %item.id, "Dropping against vote on a new relationship");
                ctx.progress
                    .item_skipped(&item.id, SkipReason::AgainstOnNewRelationship);
                outcome
                    .skipped
                    .push(SkippedItem::new(&item.id, SkipReason::AgainstOnNewRelationship));
            } else {
                votes.push(item);
            }
        }

        let groups = group_by_triple(&ctx.subject, &votes);
        let (to_create, rerouted) = self.split_existing(groups).await;
        outcome.rerouted = rerouted;
        if to_create.is_empty() {
            info!(rerouted = outcome.rerouted.len(), "No relationship left to create");
            return Ok(outcome);
        }

        let (call, planned) = self.build_creation(ctx, to_create)?;
        let created = call.len();
        let call = LedgerCall::CreateRelationships(call);
        outcome.deposited = call.value();

        let receipt = self
            .sender
            .send(&call, Phase::CreatingRelationships, &ctx.progress)
            .await?;
        outcome.created = created;
        outcome.hashes.push(receipt.hash);
        info!(created, "Relationships created");

        let deferred: Vec<PlannedRelationship> = planned
            .into_iter()
            .filter(|p| p.mode == DepositMode::Deferred)
            .collect();
        if deferred.is_empty() {
            return Ok(outcome);
        }

        let keys: Vec<TripleKey> = deferred.iter().map(|p| p.key.clone()).collect();
        let resolved = self.poller.wait_for_relationships(&keys).await;

        let mut batch = DepositBatch::new(ctx.account.clone());
        for planned in deferred {
            let Some(info) = resolved.get(&planned.key) else {
                for item in &planned.items {
                    ctx.progress.item_skipped(&item.id, SkipReason::NotIndexed);
                    outcome
                        .skipped
                        .push(SkippedItem::new(&item.id, SkipReason::NotIndexed));
                }
                continue;
            };

            for (index, item) in planned.items.iter().enumerate() {
                // the creation already paid the cost out of the first vote
                let amount = if index == 0 {
                    item.amount.saturating_sub(ctx.contract.triple_cost)
                } else {
                    item.amount
                };
                if amount == 0 {
                    debug!(item_id = %item.id, "Nothing left to deposit after creation cost");
                    continue;
                }
                batch.push(
                    info.triple_id.clone(),
                    ctx.curve_ids.id_for(item.curve),
                    amount,
                );
            }
        }

        if batch.is_empty() {
            return Ok(outcome);
        }

        let deposited = batch.total_assets();
        let receipt = self
            .sender
            .send(
                &LedgerCall::DepositBatch(batch),
                Phase::CreatingRelationships,
                &ctx.progress,
            )
            .await?;
        info!(assets = %deposited, tx_hash = %receipt.hash, "Deferred deposits confirmed");
        outcome.deposited = outcome.deposited.saturating_add(deposited);
        outcome.hashes.push(receipt.hash);

        Ok(outcome)
    }

    /// Look every relationship up once; the ones already indexed are not
    /// re-created
    async fn split_existing(
        &self,
        groups: BTreeMap<TripleKey, TripleGroup>,
    ) -> (Vec<TripleGroup>, Vec<CartItem>) {
        let indexer = self.poller.indexer();
        let lookups = groups.into_values().map(|group| async move {
            let key = &group.key;
            let found = match key.resolved_object() {
                Some(object) => indexer
                    .find_relationship(&key.subject, &key.predicate, object)
                    .await
                    .unwrap_or_else(|e| {
                        warn!(relationship = %key, error = %e, "Relationship lookup failed");
                        None
                    }),
                None => None,
            };
            (group, found)
        });

        let mut to_create = Vec::new();
        let mut rerouted = Vec::new();
        for (group, found) in join_all(lookups).await {
            match found {
                Some(existing) => {
                    info!(relationship = %group.key, triple_id = %existing.triple_id, "Relationship already exists");
                    rerouted.extend(group.items.into_iter().map(|item| {
                        item.with_relationship(
                            existing.triple_id.clone(),
                            existing.counter_triple_id.clone(),
                        )
                    }));
                }
                None => to_create.push(group),
            }
        }
        (to_create, rerouted)
    }

    fn build_creation(
        &self,
        ctx: &SubmissionContext,
        groups: Vec<TripleGroup>,
    ) -> Result<(CreateRelationships, Vec<PlannedRelationship>), EngineError> {
        let mut call = CreateRelationships {
            subjects: Vec::new(),
            predicates: Vec::new(),
            objects: Vec::new(),
            assets: Vec::new(),
        };
        let mut planned = Vec::with_capacity(groups.len());

        for TripleGroup {
            key,
            items,
            curve_mix,
            ..
        } in groups
        {
            let object = key.resolved_object().cloned().ok_or_else(|| {
                let item_id = items.first().map(|i| i.id.clone()).unwrap_or_default();
                EngineError::InvalidItem {
                    item_id,
                    reason: format!("object of {} was never created", key),
                }
            })?;

            let mode = DepositMode::for_group(curve_mix, &items);
            let assets = match mode {
                DepositMode::Inline => items[0].amount,
                DepositMode::Deferred => ctx.contract.triple_cost,
            };
            debug!(relationship = %key, mode = ?mode, assets = %assets, "Planned relationship");

            call.subjects.push(key.subject.clone());
            call.predicates.push(key.predicate.clone());
            call.objects.push(object);
            call.assets.push(assets);
            planned.push(PlannedRelationship { key, mode, items });
        }

        Ok((call, planned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{
        new_relationship_item, reporter, MockTestIndexer, MockTestLedger, CONTRACT,
    };
    use crate::domain::indexer::{IndexedRelationship, Indexer};
    use crate::domain::ledger::{Ledger, ReceiptStatus, TxReceipt};
    use crate::types::{Address, Curve, CurveIds, TermId};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

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

    fn creator(ledger: MockTestLedger, indexer: MockTestIndexer) -> RelationshipCreator {
        let ledger: Arc<dyn Ledger> = Arc::new(ledger);
        let indexer: Arc<dyn Indexer> = Arc::new(indexer);
        RelationshipCreator::new(
            TransactionSender::new(ledger),
            IndexingPoller::new(indexer, Duration::from_millis(10), 3),
        )
    }

    fn recording_ledger(calls: Arc<Mutex<Vec<LedgerCall>>>, created: Arc<AtomicBool>) -> MockTestLedger {
        let mut ledger = MockTestLedger::new();
        ledger.expect_simulate().returning(|_| Ok(()));
        ledger.expect_submit().returning(move |call| {
            if matches!(call, LedgerCall::CreateRelationships(_)) {
                created.store(true, Ordering::SeqCst);
            }
            let mut calls = calls.lock();
            calls.push(call.clone());
            Ok(TxHash::new(format!("0x{}", calls.len())))
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

    /// Indexer that shows relationships only after the creation transaction,
    /// except for objects listed in `never`
    fn indexer_after_creation(created: Arc<AtomicBool>, never: &'static [&'static str]) -> MockTestIndexer {
        let mut indexer = MockTestIndexer::new();
        indexer.expect_find_relationship().returning(move |_, _, object| {
            if !created.load(Ordering::SeqCst) || never.contains(&object.as_str()) {
                return Ok(None);
            }
            Ok(Some(IndexedRelationship {
                triple_id: TermId::new(format!("{}-t", object)),
                counter_triple_id: Some(TermId::new(format!("{}-c", object))),
            }))
        });
        indexer
    }

    #[test]
    fn test_deposit_mode() {
        let linear_for = new_relationship_item("a", "0xo", Direction::For, Curve::Linear, 5_000);
        let progressive = new_relationship_item("b", "0xo", Direction::For, Curve::Progressive, 5_000);

        assert_eq!(
            DepositMode::for_group(CurveMix::LinearOnly, &[linear_for.clone()]),
            DepositMode::Inline
        );
        assert_eq!(
            DepositMode::for_group(CurveMix::ProgressiveOnly, &[progressive.clone()]),
            DepositMode::Deferred
        );
        assert_eq!(
            DepositMode::for_group(CurveMix::LinearOnly, &[linear_for.clone(), linear_for.clone()]),
            DepositMode::Deferred
        );
        assert_eq!(
            DepositMode::for_group(CurveMix::Mixed, &[linear_for, progressive]),
            DepositMode::Deferred
        );
    }

    #[tokio::test]
    async fn test_inline_linear_vote_needs_one_transaction() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let created = Arc::new(AtomicBool::new(false));
        let ledger = recording_ledger(calls.clone(), created.clone());
        let indexer = indexer_after_creation(created, &[]);

        let items = vec![new_relationship_item("a", "0xo1", Direction::For, Curve::Linear, 4_100)];
        let outcome = creator(ledger, indexer)
            .create_relationships(&context(), items)
            .await
            .unwrap();

        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.hashes.len(), 1);
        assert_eq!(outcome.deposited, 4_100);
        let calls = calls.lock();
        match &calls[..] {
            [LedgerCall::CreateRelationships(call)] => {
                assert_eq!(call.assets, vec![4_100]);
                assert_eq!(call.objects, vec![TermId::new("0xo1")]);
                assert_eq!(call.subjects, vec![TermId::new("0xsubject")]);
            }
            other => panic!("Unexpected calls: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deferred_deposits_subtract_cost_once() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let created = Arc::new(AtomicBool::new(false));
        let ledger = recording_ledger(calls.clone(), created.clone());
        let indexer = indexer_after_creation(created, &[]);

        let items = vec![
            new_relationship_item("first", "0xo1", Direction::For, Curve::Progressive, 5_000),
            new_relationship_item("second", "0xo1", Direction::For, Curve::Linear, 4_200),
        ];
        let outcome = creator(ledger, indexer)
            .create_relationships(&context(), items)
            .await
            .unwrap();

        assert_eq!(outcome.hashes.len(), 2);
        assert_eq!(outcome.deposited, 4_000 + 1_000 + 4_200);
        let calls = calls.lock();
        match &calls[..] {
            [LedgerCall::CreateRelationships(create), LedgerCall::DepositBatch(deposit)] => {
                assert_eq!(create.assets, vec![CONTRACT.triple_cost]);
                assert_eq!(deposit.term_ids, vec![TermId::new("0xo1-t"), TermId::new("0xo1-t")]);
                assert_eq!(deposit.curve_ids, vec![2, 1]);
                assert_eq!(deposit.assets, vec![1_000, 4_200]);
            }
            other => panic!("Unexpected calls: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unindexed_relationship_skips_only_its_items() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let created = Arc::new(AtomicBool::new(false));
        let ledger = recording_ledger(calls.clone(), created.clone());
        let indexer = indexer_after_creation(created, &["0xslow"]);

        let items = vec![
            new_relationship_item("fast", "0xfast", Direction::For, Curve::Progressive, 5_000),
            new_relationship_item("slow", "0xslow", Direction::For, Curve::Progressive, 5_000),
        ];
        let outcome = creator(ledger, indexer)
            .create_relationships(&context(), items)
            .await
            .unwrap();

        assert_eq!(outcome.created, 2);
        assert_eq!(
            outcome.skipped,
            vec![SkippedItem::new("slow", SkipReason::NotIndexed)]
        );
        let calls = calls.lock();
        match &calls[1] {
            LedgerCall::DepositBatch(deposit) => {
                assert_eq!(deposit.term_ids, vec![TermId::new("0xfast-t")]);
            }
            other => panic!("Expected DepositBatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_against_never_reaches_the_ledger() {
        let mut ledger = MockTestLedger::new();
        ledger.expect_simulate().never();
        ledger.expect_submit().never();
        let mut indexer = MockTestIndexer::new();
        indexer.expect_find_relationship().returning(|_, _, _| Ok(None));

        let items = vec![new_relationship_item("a", "0xo1", Direction::Against, Curve::Progressive, 5_000)];
        let outcome = creator(ledger, indexer)
            .create_relationships(&context(), items)
            .await
            .unwrap();

        assert_eq!(outcome.created, 0);
        assert_eq!(
            outcome.skipped,
            vec![SkippedItem::new("a", SkipReason::AgainstOnNewRelationship)]
        );
    }

    #[tokio::test]
    async fn test_existing_relationship_is_rerouted() {
        let mut ledger = MockTestLedger::new();
        ledger.expect_submit().never();
        let mut indexer = MockTestIndexer::new();
        indexer.expect_find_relationship().returning(|_, _, _| {
            Ok(Some(IndexedRelationship {
                triple_id: TermId::new("0xraced"),
                counter_triple_id: Some(TermId::new("0xraced-c")),
            }))
        });

        let items = vec![new_relationship_item("a", "0xo1", Direction::For, Curve::Linear, 5_000)];
        let outcome = creator(ledger, indexer)
            .create_relationships(&context(), items)
            .await
            .unwrap();

        assert_eq!(outcome.created, 0);
        assert_eq!(outcome.rerouted.len(), 1);
        assert_eq!(outcome.rerouted[0].triple_id, Some(TermId::new("0xraced")));
        assert!(outcome.rerouted[0].relationship_exists());
    }
}
