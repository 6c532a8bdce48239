//! SurrealDB schema migrations and initialization
//!
//! Sets up the audit-trail tables with their append-only permissions and
//! ordering indexes.

use crate::error::StateError;
use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all tables. Idempotent.
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing aixiv SurrealDB schema");

    init_decision_records_table(db).await?;

    info!("aixiv schema initialization complete");
    Ok(())
}

/// Initialize `decision_records`
///
/// Schema:
/// ```text
/// TABLE decision_records {
///   record_id:           STRING (unique)
///   paper_id:            STRING (indexed)
///   seq:                 INT    (unique per paper)
///   run_id:              STRING?
///   action_type:         STRING
///   actor:               STRING
///   model:               STRING?
///   prompt_fingerprint:  STRING?
///   input_summary:       STRING
///   output_summary:      STRING
///   metadata:            OBJECT
///   recorded_at:         DATETIME (indexed)
/// }
/// ```
///
/// Records are append-only: update and delete are denied at table level.
async fn init_decision_records_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing decision_records table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS decision_records AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_decision_record_id ON TABLE decision_records COLUMNS record_id UNIQUE;

        -- Per-paper total order
        DEFINE INDEX IF NOT EXISTS idx_decision_paper_seq ON TABLE decision_records COLUMNS paper_id, seq UNIQUE;

        DEFINE INDEX IF NOT EXISTS idx_decision_recorded_at ON TABLE decision_records COLUMNS recorded_at;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StateError::SchemaSetup(format!("decision_records: {e}")))?;

    debug!("decision_records table initialized");
    Ok(())
}
