use crate::application::context::SubmissionContext;
use crate::application::poller::IndexingPoller;
use crate::application::transaction::TransactionSender;
use crate::domain::cart::CartItem;
use crate::domain::events::Phase;
use crate::domain::ledger::{CreateObjects, LedgerCall};
use crate::domain::report::{SkipReason, SkippedItem};
use crate::error::{EngineError, LedgerErrorCode};
use crate::types::{Direction, TermId, TxHash};
use futures::future::join_all;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Labels resolved to ids
#[derive(Debug, Clone, Default)]
pub struct EnsuredObjects {
    /// Id per label
    pub ids: HashMap<String, TermId>,
    /// Objects actually created, as opposed to found
    pub created: usize,
    /// Creation transactions
    pub hashes: Vec<TxHash>,
}

impl EnsuredObjects {
    fn absorb(&mut self, other: EnsuredObjects) {
        self.ids.extend(other.ids);
        self.created += other.created;
        self.hashes.extend(other.hashes);
    }
}

/// Result of the object phase
#[derive(Debug, Clone, Default)]
pub struct ObjectCreationOutcome {
    /// Items rewritten to point at their now-existing object
    pub items: Vec<CartItem>,
    /// Objects created, categories included
    pub created: usize,
    /// Creation transactions
    pub hashes: Vec<TxHash>,
    /// Items dropped
    pub skipped: Vec<SkippedItem>,
}

/// Creates objects and categories that items reference but the ledger lacks
#[derive(Clone)]
pub struct ObjectCreator {
    sender: TransactionSender,
    poller: IndexingPoller,
}

impl ObjectCreator {
    /// Create a creator
    pub fn new(sender: TransactionSender, poller: IndexingPoller) -> Self {
        Self { sender, poller }
    }

    /// Make sure every item's category and object exist, then point the items
    /// at them.
    ///
    /// Against items are dropped: a relationship on a brand-new object can
    /// only start with a for deposit.
    pub async fn create_objects(
        &self,
        ctx: &SubmissionContext,
        items: Vec<CartItem>,
    ) -> Result<ObjectCreationOutcome, EngineError> {
        let mut outcome = ObjectCreationOutcome::default();

        let mut pending = Vec::with_capacity(items.len());
        for item in items {
            if item.direction == Direction::Against {
                warn!(item_id = %item.id, "Dropping against vote on a new object");
                ctx.progress
                    .item_skipped(&item.id, SkipReason::AgainstOnNewRelationship);
                outcome
                    .skipped
                    .push(SkippedItem::new(&item.id, SkipReason::AgainstOnNewRelationship));
            } else {
                pending.push(item);
            }
        }

        let categories = unique_labels(pending.iter().filter_map(|item| {
            let new_object = item.new_object.as_ref()?;
            new_object
                .category_id
                .is_none()
                .then(|| new_object.category.clone())
        }));
        if !categories.is_empty() {
            let ensured = self.ensure_objects(ctx, &categories).await?;
            debug!(categories = ensured.ids.len(), "Categories ready");
            outcome.created += ensured.created;
            outcome.hashes.extend(ensured.hashes);
        }

        let labels = unique_labels(
            pending
                .iter()
                .filter_map(|item| item.new_object.as_ref().map(|o| o.name.clone())),
        );
        let objects = self.ensure_objects(ctx, &labels).await?;
        outcome.created += objects.created;
        outcome.hashes.extend(objects.hashes);

        for item in pending {
            let id = item
                .new_object
                .as_ref()
                .and_then(|o| objects.ids.get(&o.name))
                .cloned()
                .or_else(|| item.object_id.clone())
                .ok_or_else(|| EngineError::InvalidItem {
                    item_id: item.id.clone(),
                    reason: "object could not be resolved".to_string(),
                })?;
            outcome.items.push(item.with_object_id(id));
        }

        info!(
            created = outcome.created,
            items = outcome.items.len(),
            "Objects ready"
        );
        Ok(outcome)
    }

    /// Get-or-create for a set of labels.
    ///
    /// Labels already indexed are reused. The rest are created in one
    /// transaction; if that reverts because someone else created one of them
    /// in the meantime, each label is resolved on its own.
    pub async fn ensure_objects(
        &self,
        ctx: &SubmissionContext,
        labels: &[String],
    ) -> Result<EnsuredObjects, EngineError> {
        let mut ensured = EnsuredObjects::default();
        if labels.is_empty() {
            return Ok(ensured);
        }

        let missing = self.lookup_missing(labels, &mut ensured).await;
        if missing.is_empty() {
            debug!(labels = labels.len(), "All objects already exist");
            return Ok(ensured);
        }

        match self.create_batch(ctx, &missing).await {
            Ok(created) => ensured.absorb(created),
            Err(EngineError::Ledger(e)) if e.is(LedgerErrorCode::TermAlreadyExists) => {
                warn!(error = %e.message, "Object created concurrently, resolving one by one");
                for label in &missing {
                    let single = self.get_or_create(ctx, label).await?;
                    ensured.absorb(single);
                }
            }
            Err(e) => return Err(e),
        }

        Ok(ensured)
    }

    /// Look labels up concurrently, recording the ones found
    async fn lookup_missing(&self, labels: &[String], ensured: &mut EnsuredObjects) -> Vec<String> {
        let indexer = self.poller.indexer();
        let lookups = labels
            .iter()
            .map(|label| async move { (label, indexer.find_object_by_label(label).await) });

        let mut missing = Vec::new();
        for (label, found) in join_all(lookups).await {
            match found {
                Ok(Some(id)) => {
                    debug!(label = %label, term_id = %id, "Object already exists");
                    ensured.ids.insert(label.clone(), id);
                }
                Ok(None) => missing.push(label.clone()),
                Err(e) => {
                    // creation will tell us if it exists after all
                    warn!(label = %label, error = %e, "Object lookup failed");
                    missing.push(label.clone());
                }
            }
        }
        missing
    }

    async fn create_batch(
        &self,
        ctx: &SubmissionContext,
        labels: &[String],
    ) -> Result<EnsuredObjects, EngineError> {
        let call = LedgerCall::CreateObjects(CreateObjects {
            labels: labels.to_vec(),
            assets: vec![ctx.contract.object_cost; labels.len()],
        });
        let receipt = self
            .sender
            .send(&call, Phase::CreatingObjects, &ctx.progress)
            .await?;

        let mut ensured = EnsuredObjects {
            created: labels.len(),
            hashes: vec![receipt.hash],
            ..Default::default()
        };

        if receipt.created_terms.len() == labels.len() {
            ensured
                .ids
                .extend(labels.iter().cloned().zip(receipt.created_terms));
        } else {
            // receipt without term ids: the indexer will have them
            for label in labels {
                let id = self.poller.wait_for_object(label).await?;
                ensured.ids.insert(label.clone(), id);
            }
        }
        Ok(ensured)
    }

    async fn get_or_create(
        &self,
        ctx: &SubmissionContext,
        label: &str,
    ) -> Result<EnsuredObjects, EngineError> {
        let mut ensured = EnsuredObjects::default();
        if let Ok(Some(id)) = self.poller.indexer().find_object_by_label(label).await {
            ensured.ids.insert(label.to_string(), id);
            return Ok(ensured);
        }

        match self.create_batch(ctx, &[label.to_string()]).await {
            Ok(created) => Ok(created),
            Err(EngineError::Ledger(e)) if e.is(LedgerErrorCode::TermAlreadyExists) => {
                let id = self.poller.wait_for_object(label).await?;
                ensured.ids.insert(label.to_string(), id);
                Ok(ensured)
            }
            Err(e) => Err(e),
        }
    }
}

fn unique_labels(labels: impl Iterator<Item = String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    for label in labels {
        if !unique.contains(&label) {
            unique.push(label);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{reporter, MockTestIndexer, MockTestLedger, CONTRACT};
    use crate::domain::cart::NewObject;
    use crate::domain::indexer::Indexer;
    use crate::domain::ledger::{Ledger, ReceiptStatus, TxReceipt};
    use crate::error::LedgerError;
    use crate::types::{Address, Curve, CurveIds};
    use parking_lot::Mutex;
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

    fn creator(ledger: MockTestLedger, indexer: MockTestIndexer) -> ObjectCreator {
        let ledger: Arc<dyn Ledger> = Arc::new(ledger);
        let indexer: Arc<dyn Indexer> = Arc::new(indexer);
        ObjectCreator::new(
            TransactionSender::new(ledger),
            IndexingPoller::new(indexer, Duration::from_millis(10), 3),
        )
    }

    fn new_object_item(id: &str, name: &str, category_id: Option<&str>, direction: Direction) -> CartItem {
        CartItem {
            id: id.to_string(),
            object_id: None,
            predicate_id: TermId::new("0xpredicate"),
            triple_id: None,
            counter_triple_id: None,
            direction,
            curve: Curve::Linear,
            amount: 5_000,
            opposing_position: None,
            new_object: Some(NewObject {
                name: name.to_string(),
                category: "Languages".to_string(),
                category_id: category_id.map(TermId::new),
            }),
        }
    }

    /// Ledger whose creations return one term per label, named after it
    fn creating_ledger(calls: Arc<Mutex<Vec<LedgerCall>>>) -> MockTestLedger {
        let mut ledger = MockTestLedger::new();
        ledger.expect_simulate().returning(|_| Ok(()));
        let submitted = calls.clone();
        ledger.expect_submit().returning(move |call| {
            let mut calls = submitted.lock();
            calls.push(call.clone());
            Ok(TxHash::new(format!("0x{}", calls.len())))
        });
        let created = calls.clone();
        ledger.expect_wait_for_receipt().returning(move |hash| {
            let terms = match created.lock().last() {
                Some(LedgerCall::CreateObjects(call)) => call
                    .labels
                    .iter()
                    .map(|l| TermId::new(format!("0x{}", l.to_lowercase())))
                    .collect(),
                _ => vec![],
            };
            Ok(TxReceipt {
                hash: hash.clone(),
                status: ReceiptStatus::Success,
                created_terms: terms,
            })
        });
        ledger
    }

    #[tokio::test]
    async fn test_creates_category_then_object() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut indexer = MockTestIndexer::new();
        indexer.expect_find_object_by_label().returning(|_| Ok(None));

        let items = vec![
            new_object_item("a", "Rust", None, Direction::For),
            new_object_item("b", "Rust", None, Direction::For),
        ];

        let outcome = creator(creating_ledger(calls.clone()), indexer)
            .create_objects(&context(), items)
            .await
            .unwrap();

        assert_eq!(outcome.created, 2);
        assert_eq!(outcome.hashes.len(), 2);
        assert!(outcome.items.iter().all(|i| i.object_id == Some(TermId::new("0xrust"))));
        assert!(outcome.items.iter().all(CartItem::object_exists));

        let calls = calls.lock();
        match (&calls[0], &calls[1]) {
            (LedgerCall::CreateObjects(categories), LedgerCall::CreateObjects(objects)) => {
                assert_eq!(categories.labels, vec!["Languages".to_string()]);
                assert_eq!(objects.labels, vec!["Rust".to_string()]);
                assert_eq!(objects.assets, vec![CONTRACT.object_cost]);
            }
            other => panic!("Unexpected calls: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_existing_object_is_reused_and_against_dropped() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut indexer = MockTestIndexer::new();
        indexer
            .expect_find_object_by_label()
            .returning(|label| Ok((label == "Rust").then(|| TermId::new("0xexisting"))));

        let items = vec![
            new_object_item("for", "Rust", Some("0xcat"), Direction::For),
            new_object_item("against", "Go", Some("0xcat"), Direction::Against),
        ];

        let outcome = creator(creating_ledger(calls.clone()), indexer)
            .create_objects(&context(), items)
            .await
            .unwrap();

        assert_eq!(outcome.created, 0);
        assert!(calls.lock().is_empty());
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].object_id, Some(TermId::new("0xexisting")));
        assert_eq!(
            outcome.skipped,
            vec![SkippedItem::new("against", SkipReason::AgainstOnNewRelationship)]
        );
    }

    #[tokio::test]
    async fn test_concurrent_creation_falls_back_to_polling() {
        let lookups = Arc::new(Mutex::new(0u32));
        let seen = lookups.clone();
        let mut indexer = MockTestIndexer::new();
        indexer.expect_find_object_by_label().returning(move |_| {
            let mut n = seen.lock();
            *n += 1;
            // the racing creation becomes visible on the third lookup
            Ok((*n >= 3).then(|| TermId::new("0xraced")))
        });

        let mut ledger = MockTestLedger::new();
        ledger
            .expect_simulate()
            .returning(|_| Err(LedgerError::from_raw("execution reverted: MultiVault_AtomExists")));
        ledger.expect_submit().never();

        let outcome = creator(ledger, indexer)
            .create_objects(
                &context(),
                vec![new_object_item("a", "Rust", Some("0xcat"), Direction::For)],
            )
            .await
            .unwrap();

        assert_eq!(outcome.created, 0);
        assert_eq!(outcome.items[0].object_id, Some(TermId::new("0xraced")));
    }

    #[tokio::test]
    async fn test_other_ledger_errors_propagate() {
        let mut indexer = MockTestIndexer::new();
        indexer.expect_find_object_by_label().returning(|_| Ok(None));
        let mut ledger = MockTestLedger::new();
        ledger
            .expect_simulate()
            .returning(|_| Err(LedgerError::from_raw("User rejected the request.")));

        let err = creator(ledger, indexer)
            .create_objects(
                &context(),
                vec![new_object_item("a", "Rust", Some("0xcat"), Direction::For)],
            )
            .await
            .unwrap_err();

        match err {
            EngineError::Ledger(e) => assert!(e.is(LedgerErrorCode::UserRejected)),
            other => panic!("Expected ledger error, got {:?}", other),
        }
    }
}
