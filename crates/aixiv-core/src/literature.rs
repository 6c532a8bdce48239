//! Literature-search capability consumed by the literature stage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::error::StageError;

/// A candidate related work returned by a search backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedWork {
    /// Backend-stable identifier; used for de-duplication across rounds
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Black-box search over related work. Results carry no freshness guarantee.
#[async_trait]
pub trait LiteratureSearch: Send + Sync {
    /// At most `max_results` works for `query`.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<RelatedWork>, StageError>;
}

/// Backend that never finds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLiterature;

#[async_trait]
impl LiteratureSearch for NoLiterature {
    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<RelatedWork>, StageError> {
        Ok(Vec::new())
    }
}
