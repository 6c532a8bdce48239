//! aixiv-state: persistence for the paper lifecycle
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: record integrity, the single-active-run invariant, and an audit
//! trail that can only grow.
//!
//! ## Key Components
//!
//! - `storage_traits`: `PaperStore`, `RunLedger`, `EvidenceStore`, `DecisionLog`
//! - `fakes`: in-memory implementations of every trait
//! - `SurrealDecisionLog`: SurrealDB-backed append-only decision log

pub mod connection;
mod error;
pub mod fakes;
pub mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_decision_log;

pub use connection::{DbScope, DbTarget};
pub use error::{StateError, StorageError};
pub use storage_traits::{
    ChecklistItemResult, DecisionLog, DecisionRecord, Dimension, DimensionScores, EvidenceStore,
    GateStatus, LevelChecklist, MaturityAssessmentRecord, MaturityLevel, NewDecision, PaperId,
    PaperRecord, PaperSection, PaperState, PaperStore, PipelineRunRecord, PromptFingerprint,
    Recommendation, RecordId, ReviewRecord, RiskLevel, RunId, RunKind, RunLedger, RunStatus,
    Scenario, ScoreCardRecord, StageExecution, StageOutcome, StageStatus, StorageResult,
};
pub use surreal_decision_log::SurrealDecisionLog;

/// Result type for aixiv-state set-up operations
pub type Result<T> = std::result::Result<T, StateError>;
