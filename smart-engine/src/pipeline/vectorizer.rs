//! Feature extraction over batches of data

use crate::db::data;
use async_trait::async_trait;
use smart_common::db::Datum;
use smart_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Computes and stores feature vectors for data
///
/// Called once per vectorization task attempt; storing must overwrite, so a
/// retried attempt leaves the same vectors behind.
#[async_trait]
pub trait Vectorizer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn vectorize(&self, project_id: Uuid, data: &[Datum]) -> Result<()>;
}

/// Sparse term-frequency vectors stored as JSON in `data_vectors`
pub struct TermFrequencyVectorizer {
    db: SqlitePool,
}

impl TermFrequencyVectorizer {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

/// Lowercased alphanumeric terms and their counts
pub fn term_frequencies(text: &str) -> BTreeMap<String, u32> {
    let mut terms = BTreeMap::new();
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        *terms.entry(token.to_lowercase()).or_insert(0) += 1;
    }
    terms
}

#[async_trait]
impl Vectorizer for TermFrequencyVectorizer {
    fn name(&self) -> &'static str {
        "term_frequency"
    }

    async fn vectorize(&self, project_id: Uuid, data: &[Datum]) -> Result<()> {
        for datum in data {
            if datum.project_id != project_id {
                return Err(Error::InvalidInput(format!(
                    "datum {} does not belong to project {}",
                    datum.id, project_id
                )));
            }
            let vector = serde_json::to_string(&term_frequencies(&datum.text))
                .map_err(|e| Error::Internal(format!("vector encoding failed: {}", e)))?;
            data::upsert_vector(&self.db, datum.id, &vector).await?;
        }

        tracing::debug!(%project_id, count = data.len(), "Stored term-frequency vectors");
        Ok(())
    }
}
