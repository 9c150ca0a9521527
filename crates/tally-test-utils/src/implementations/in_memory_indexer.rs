//! Indexer fake that mirrors a [`SimulatedLedger`] with configurable lag.

use super::SimulatedLedger;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tally_core::{IndexedRelationship, Indexer, IndexerError, TermId};

#[derive(Debug, Clone, Default)]
struct Lag {
    object: u32,
    relationship: u32,
    counter: u32,
    hidden_objects: HashSet<TermId>,
    failures_left: u32,
}

/// Query counters, for asserting on polling behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryCounts {
    /// `find_relationship` calls
    pub relationships: usize,
    /// `find_object_by_label` calls
    pub objects: usize,
}

/// An [`Indexer`] that reads from a [`SimulatedLedger`].
///
/// Lag is counted in queries: a term that exists on the ledger stays
/// invisible for the first `n` queries that would have found it. A
/// relationship's counter id can lag further behind the relationship itself.
#[derive(Clone)]
pub struct InMemoryIndexer {
    ledger: SimulatedLedger,
    lag: Arc<Mutex<Lag>>,
    sightings: Arc<Mutex<HashMap<TermId, u32>>>,
    counts: Arc<Mutex<QueryCounts>>,
}

impl fmt::Debug for InMemoryIndexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryIndexer")
            .field("lag", &*self.lag.lock())
            .field("counts", &*self.counts.lock())
            .finish()
    }
}

impl InMemoryIndexer {
    /// Mirror `ledger` with no lag
    pub fn new(ledger: SimulatedLedger) -> Self {
        Self {
            ledger,
            lag: Arc::new(Mutex::new(Lag::default())),
            sightings: Arc::new(Mutex::new(HashMap::new())),
            counts: Arc::new(Mutex::new(QueryCounts::default())),
        }
    }

    /// Hide new objects for `queries` lookups
    pub fn with_object_lag(self, queries: u32) -> Self {
        self.lag.lock().object = queries;
        self
    }

    /// Hide new relationships for `queries` lookups
    pub fn with_relationship_lag(self, queries: u32) -> Self {
        self.lag.lock().relationship = queries;
        self
    }

    /// Report relationships without their counter id for a further
    /// `queries` lookups
    pub fn with_counter_lag(self, queries: u32) -> Self {
        self.lag.lock().counter = queries;
        self
    }

    /// Never index relationships pointing at `object`
    pub fn never_index_object(&self, object: &TermId) {
        self.lag.lock().hidden_objects.insert(object.clone());
    }

    /// Fail the next `n` queries with a 503
    pub fn fail_next_queries(&self, n: u32) {
        self.lag.lock().failures_left = n;
    }

    /// Queries served so far
    pub fn query_counts(&self) -> QueryCounts {
        *self.counts.lock()
    }

    fn take_failure(&self) -> Result<(), IndexerError> {
        let mut lag = self.lag.lock();
        if lag.failures_left > 0 {
            lag.failures_left -= 1;
            return Err(IndexerError::Status(503));
        }
        Ok(())
    }

    fn sighting(&self, id: &TermId) -> u32 {
        let mut sightings = self.sightings.lock();
        let seen = sightings.entry(id.clone()).or_insert(0);
        *seen += 1;
        *seen
    }
}

#[async_trait]
impl Indexer for InMemoryIndexer {
    async fn find_relationship(
        &self,
        subject: &TermId,
        predicate: &TermId,
        object: &TermId,
    ) -> Result<Option<IndexedRelationship>, IndexerError> {
        self.counts.lock().relationships += 1;
        self.take_failure()?;

        let info = match self.ledger.lookup_relationship(subject, predicate, object) {
            Some(info) => info,
            None => return Ok(None),
        };
        let lag = self.lag.lock().clone();
        if lag.hidden_objects.contains(object) {
            return Ok(None);
        }

        let seen = self.sighting(&info.triple_id);
        if seen <= lag.relationship {
            return Ok(None);
        }
        let counter_triple_id = if seen <= lag.relationship + lag.counter {
            None
        } else {
            Some(info.counter_triple_id)
        };
        Ok(Some(IndexedRelationship {
            triple_id: info.triple_id,
            counter_triple_id,
        }))
    }

    async fn find_object_by_label(&self, label: &str) -> Result<Option<TermId>, IndexerError> {
        self.counts.lock().objects += 1;
        self.take_failure()?;

        let id = match self.ledger.lookup_object(label) {
            Some(id) => id,
            None => return Ok(None),
        };
        let object_lag = self.lag.lock().object;
        if self.sighting(&id) <= object_lag {
            return Ok(None);
        }
        Ok(Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_counter_id_lags_behind_relationship() {
        let ledger = SimulatedLedger::default();
        let s = ledger.seed_object("s");
        let p = ledger.seed_object("p");
        let o = ledger.seed_object("o");
        let info = ledger.seed_relationship(&s, &p, &o);

        let indexer = InMemoryIndexer::new(ledger)
            .with_relationship_lag(1)
            .with_counter_lag(1);

        assert_eq!(indexer.find_relationship(&s, &p, &o).await.unwrap(), None);
        let partial = indexer.find_relationship(&s, &p, &o).await.unwrap().unwrap();
        assert_eq!(partial.counter_triple_id, None);
        let full = indexer.find_relationship(&s, &p, &o).await.unwrap().unwrap();
        assert_eq!(full.counter_triple_id, Some(info.counter_triple_id));
        assert_eq!(indexer.query_counts().relationships, 3);
    }

    #[tokio::test]
    async fn test_failures_and_hidden_objects() {
        let ledger = SimulatedLedger::default();
        let s = ledger.seed_object("s");
        let p = ledger.seed_object("p");
        let o = ledger.seed_object("o");
        ledger.seed_relationship(&s, &p, &o);

        let indexer = InMemoryIndexer::new(ledger);
        indexer.fail_next_queries(1);
        assert_eq!(
            indexer.find_object_by_label("s").await.unwrap_err(),
            IndexerError::Status(503)
        );
        assert_eq!(indexer.find_object_by_label("s").await.unwrap(), Some(s.clone()));

        indexer.never_index_object(&o);
        assert_eq!(indexer.find_relationship(&s, &p, &o).await.unwrap(), None);
    }
}
