//! SurrealDB-backed DecisionLog implementation
//!
//! Uses `schema::DecisionRow` for persistence, converting to/from
//! `storage_traits` types at the boundary.

use async_trait::async_trait;
use chrono::Utc;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::connection::{self, DbScope, DbTarget};
use crate::error::StorageError;
use crate::schema::{DecisionRow, SeqRow};
use crate::storage_traits::{DecisionLog, DecisionRecord, NewDecision, PaperId, StorageResult};

/// SurrealDB-backed implementation of [`DecisionLog`].
pub struct SurrealDecisionLog {
    db: Surreal<Any>,
    /// Serializes sequence assignment within this process
    append_lock: Mutex<()>,
}

impl SurrealDecisionLog {
    /// Wrap an already-migrated connection.
    pub fn new(db: Surreal<Any>) -> Self {
        Self {
            db,
            append_lock: Mutex::new(()),
        }
    }

    /// In-memory instance (`mem://`) with the schema applied.
    pub async fn in_memory() -> crate::Result<Self> {
        let db = connection::connect_memory().await?;
        info!("SurrealDecisionLog connected (in-memory)");
        Ok(Self::new(db))
    }

    /// Connect to `target` inside `scope`, applying the schema.
    pub async fn connect(target: &DbTarget, scope: &DbScope) -> crate::Result<Self> {
        Ok(Self::new(connection::connect(target, scope).await?))
    }

    /// Connect via [`connection::connect_from_env`].
    pub async fn from_env() -> crate::Result<Self> {
        Ok(Self::new(connection::connect_from_env().await?))
    }

    async fn last_seq(&self, paper_id: &PaperId) -> StorageResult<Option<SeqRow>> {
        let pid = paper_id.0.clone();
        let mut res = self
            .db
            .query(
                "SELECT seq, recorded_at FROM decision_records \
                 WHERE paper_id = $pid ORDER BY seq DESC LIMIT 1",
            )
            .bind(("pid", pid))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<SeqRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl DecisionLog for SurrealDecisionLog {
    async fn append(&self, decision: NewDecision) -> StorageResult<DecisionRecord> {
        let _guard = self.append_lock.lock().await;

        let last = self.last_seq(&decision.paper_id).await?;
        let now = Utc::now();
        let (seq, recorded_at) = match last {
            Some(row) => (row.seq + 1, row.recorded_at.max(now)),
            None => (1, now),
        };
        let row = DecisionRow::new(decision, seq, recorded_at);

        debug!(paper_id = %row.paper_id, seq, action = %row.action_type, "appending decision");

        let created: Option<DecisionRow> = self
            .db
            .create("decision_records")
            .content(row)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        created
            .map(DecisionRow::into_record)
            .ok_or_else(|| StorageError::Backend("decision insert returned no row".to_string()))
    }

    async fn list_for(&self, paper_id: &PaperId) -> StorageResult<Vec<DecisionRecord>> {
        let pid = paper_id.0.clone();
        let mut res = self
            .db
            .query("SELECT * FROM decision_records WHERE paper_id = $pid ORDER BY seq ASC")
            .bind(("pid", pid))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<DecisionRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(rows.into_iter().map(DecisionRow::into_record).collect())
    }

    async fn list_recent(&self, limit: usize) -> StorageResult<Vec<DecisionRecord>> {
        let mut res = self
            .db
            .query("SELECT * FROM decision_records ORDER BY recorded_at DESC, seq DESC LIMIT $limit")
            .bind(("limit", limit as i64))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<DecisionRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(rows.into_iter().map(DecisionRow::into_record).collect())
    }
}
