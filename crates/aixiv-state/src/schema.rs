//! SurrealDB row types
//!
//! Rows are converted to/from `storage_traits` types at the backend boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage_traits::{
    DecisionRecord, NewDecision, PaperId, PromptFingerprint, RecordId, RunId,
};

/// Serializes chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Row in the `decision_records` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRow {
    /// SurrealDB record ID
    pub id: Option<surrealdb::sql::Thing>,
    pub record_id: String,
    pub paper_id: String,
    pub seq: u64,
    pub run_id: Option<String>,
    pub action_type: String,
    pub actor: String,
    pub model: Option<String>,
    pub prompt_fingerprint: Option<String>,
    pub input_summary: String,
    pub output_summary: String,
    pub metadata: serde_json::Value,
    #[serde(with = "surreal_datetime")]
    pub recorded_at: DateTime<Utc>,
}

impl DecisionRow {
    pub fn new(decision: NewDecision, seq: u64, recorded_at: DateTime<Utc>) -> Self {
        DecisionRow {
            id: None,
            record_id: RecordId::new().0,
            paper_id: decision.paper_id.0,
            seq,
            run_id: decision.run_id.map(|r| r.0),
            action_type: decision.action_type,
            actor: decision.actor,
            model: decision.model,
            prompt_fingerprint: decision.prompt_fingerprint.map(|f| f.as_str().to_string()),
            input_summary: decision.input_summary,
            output_summary: decision.output_summary,
            metadata: decision.metadata,
            recorded_at,
        }
    }

    pub fn into_record(self) -> DecisionRecord {
        DecisionRecord {
            record_id: RecordId(self.record_id),
            paper_id: PaperId(self.paper_id),
            seq: self.seq,
            run_id: self.run_id.map(RunId),
            action_type: self.action_type,
            actor: self.actor,
            model: self.model,
            prompt_fingerprint: self.prompt_fingerprint.map(PromptFingerprint::from_stored),
            input_summary: self.input_summary,
            output_summary: self.output_summary,
            metadata: self.metadata,
            recorded_at: self.recorded_at,
        }
    }
}

/// Projection used to find the last sequence number of a paper
#[derive(Debug, Deserialize)]
pub struct SeqRow {
    pub seq: u64,
    #[serde(with = "surreal_datetime")]
    pub recorded_at: DateTime<Utc>,
}
