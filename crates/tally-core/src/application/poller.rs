use crate::config::EngineConfig;
use crate::domain::cart::{CreatedTripleInfo, TripleKey};
use crate::domain::indexer::Indexer;
use crate::error::{IndexerError, PollError};
use crate::types::TermId;
use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bounded polling against the indexer for ids assigned by the ledger.
///
/// The budget is an attempt count, not a deadline: total wait is at most
/// `(max_attempts - 1) * interval` plus query time.
#[derive(Clone)]
pub struct IndexingPoller {
    indexer: Arc<dyn Indexer>,
    interval: Duration,
    max_attempts: u32,
}

impl IndexingPoller {
    /// Create a poller
    pub fn new(indexer: Arc<dyn Indexer>, interval: Duration, max_attempts: u32) -> Self {
        Self {
            indexer,
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Create a poller with the configured interval and attempt budget
    pub fn from_config(indexer: Arc<dyn Indexer>, config: &EngineConfig) -> Self {
        Self::new(indexer, config.poll_interval(), config.poll_max_attempts)
    }

    /// Underlying indexer, for single-shot lookups
    pub fn indexer(&self) -> &Arc<dyn Indexer> {
        &self.indexer
    }

    async fn poll<T, F, Fut>(&self, what: &str, mut lookup: F) -> Result<T, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, IndexerError>>,
    {
        for attempt in 1..=self.max_attempts {
            match lookup().await {
                Ok(Some(found)) => {
                    debug!(what, attempt, "Indexed");
                    return Ok(found);
                }
                Ok(None) => debug!(what, attempt, "Not indexed yet"),
                Err(e) => warn!(what, attempt, error = %e, "Indexer query failed"),
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        Err(PollError::NotIndexed {
            what: what.to_string(),
            attempts: self.max_attempts,
        })
    }

    /// Wait until a relationship and its counter id are both visible
    pub async fn wait_for_relationship(
        &self,
        subject: &TermId,
        predicate: &TermId,
        object: &TermId,
    ) -> Result<CreatedTripleInfo, PollError> {
        let what = format!("relationship ({}, {}, {})", subject, predicate, object);
        self.poll(&what, move || async move {
            let found = self
                .indexer
                .find_relationship(subject, predicate, object)
                .await?;
            // the counter id is populated after the relationship itself
            Ok::<_, IndexerError>(found.and_then(|r| {
                r.counter_triple_id.map(|counter| CreatedTripleInfo {
                    triple_id: r.triple_id,
                    counter_triple_id: counter,
                })
            }))
        })
        .await
    }

    /// Wait until an object with this label is visible
    pub async fn wait_for_object(&self, label: &str) -> Result<TermId, PollError> {
        let what = format!("object '{}'", label);
        self.poll(&what, || self.indexer.find_object_by_label(label))
            .await
    }

    /// Poll many relationships concurrently.
    ///
    /// The result holds every relationship that resolved within the budget;
    /// the rest are absent. Keys whose object is still unresolved are skipped.
    pub async fn wait_for_relationships(
        &self,
        keys: &[TripleKey],
    ) -> HashMap<TripleKey, CreatedTripleInfo> {
        let polls = keys.iter().filter_map(|key| {
            let object = key.resolved_object()?;
            Some(async move {
                let result = self
                    .wait_for_relationship(&key.subject, &key.predicate, object)
                    .await;
                (key, result)
            })
        });

        let mut resolved = HashMap::new();
        for (key, result) in join_all(polls).await {
            match result {
                Ok(info) => {
                    resolved.insert(key.clone(), info);
                }
                Err(e) => warn!(relationship = %key, error = %e, "Giving up on relationship"),
            }
        }

        info!(
            requested = keys.len(),
            resolved = resolved.len(),
            "Relationship polling finished"
        );
        resolved
    }
}
