use crate::error::IndexerError;
use crate::types::TermId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A relationship as seen by the indexer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedRelationship {
    /// The relationship's own (for) id
    pub triple_id: TermId,
    /// Counter (against) id; populated some time after the relationship itself
    pub counter_triple_id: Option<TermId>,
}

/// Read-only, eventually consistent mirror of ledger state
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Find a relationship by (subject, relationship kind, object)
    async fn find_relationship(
        &self,
        subject: &TermId,
        predicate: &TermId,
        object: &TermId,
    ) -> Result<Option<IndexedRelationship>, IndexerError>;

    /// Find an object by its label
    async fn find_object_by_label(&self, label: &str) -> Result<Option<TermId>, IndexerError>;
}
