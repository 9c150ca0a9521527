use crate::config::EngineConfig;
use crate::domain::indexer::{IndexedRelationship, Indexer};
use crate::error::{EngineError, IndexerError};
use crate::types::TermId;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};

const FIND_TRIPLE: &str = r#"query FindTriple($subjectId: String!, $predicateId: String!, $objectId: String!) {
  triples(where: { subject_id: { _eq: $subjectId }, predicate_id: { _eq: $predicateId }, object_id: { _eq: $objectId } }, limit: 1) {
    term_id
    counter_term_id
  }
}"#;

const FIND_ATOM_BY_LABEL: &str = r#"query FindAtomByLabel($label: String!) {
  atoms(where: { label: { _eq: $label } }, limit: 1) {
    term_id
  }
}"#;

/// Request timeout for indexer queries
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// GraphQL request body
#[derive(Debug, Serialize)]
struct GraphqlRequest<'a> {
    query: &'a str,
    variables: Value,
}

/// GraphQL response wrapper
#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct GraphqlErrorMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
struct TriplesData {
    triples: Vec<TripleRow>,
}

#[derive(Debug, Deserialize)]
struct TripleRow {
    term_id: String,
    counter_term_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomsData {
    atoms: Vec<AtomRow>,
}

#[derive(Debug, Deserialize)]
struct AtomRow {
    term_id: String,
}

/// [`Indexer`] backed by the indexer's GraphQL endpoint
#[derive(Debug, Clone)]
pub struct GraphqlIndexer {
    endpoint: String,
    client: Client,
}

impl GraphqlIndexer {
    /// Create an indexer client for `endpoint`
    pub fn new(endpoint: impl Into<String>) -> Result<Self, IndexerError> {
        let client = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self::with_client(endpoint, client))
    }

    /// Create an indexer client reusing an HTTP client
    pub fn with_client(endpoint: impl Into<String>, client: Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            client,
        }
    }

    /// Create an indexer client for the configured endpoint
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let endpoint = config
            .indexer_url
            .clone()
            .ok_or_else(|| EngineError::Config("indexer_url is not set".to_string()))?;
        Ok(Self::new(endpoint)?)
    }

    async fn query<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T, IndexerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&GraphqlRequest { query, variables })
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {}
            status => return Err(IndexerError::Status(status.as_u16())),
        }

        let body: GraphqlResponse<T> = response
            .json()
            .await
            .map_err(|e| IndexerError::Decode(e.to_string()))?;

        if !body.errors.is_empty() {
            let messages: Vec<String> = body.errors.into_iter().map(|e| e.message).collect();
            return Err(IndexerError::GraphQl(messages.join("; ")));
        }
        body.data
            .ok_or_else(|| IndexerError::Decode("response has no data".to_string()))
    }
}

#[async_trait]
impl Indexer for GraphqlIndexer {
    #[instrument(skip_all, fields(subject = %subject, predicate = %predicate, object = %object))]
    async fn find_relationship(
        &self,
        subject: &TermId,
        predicate: &TermId,
        object: &TermId,
    ) -> Result<Option<IndexedRelationship>, IndexerError> {
        let data: TriplesData = self
            .query(
                FIND_TRIPLE,
                json!({
                    "subjectId": subject.as_str(),
                    "predicateId": predicate.as_str(),
                    "objectId": object.as_str(),
                }),
            )
            .await?;

        let found = data.triples.into_iter().next().map(|row| IndexedRelationship {
            triple_id: TermId::new(row.term_id),
            counter_triple_id: row.counter_term_id.map(TermId::new),
        });
        debug!(found = found.is_some(), "Relationship lookup");
        Ok(found)
    }

    #[instrument(skip(self))]
    async fn find_object_by_label(&self, label: &str) -> Result<Option<TermId>, IndexerError> {
        let data: AtomsData = self
            .query(FIND_ATOM_BY_LABEL, json!({ "label": label }))
            .await?;

        let found = data.atoms.into_iter().next().map(|row| TermId::new(row.term_id));
        debug!(found = found.is_some(), "Object lookup");
        Ok(found)
    }
}
