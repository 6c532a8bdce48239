//! aiXiv Core Library
//!
//! Orchestration of the research-paper lifecycle: agent stages, retry,
//! decision records, evaluation, maturity targeting and arena ranking.

pub mod arena;
pub mod completion;
pub mod config;
pub mod decision;
pub mod domain;
pub mod eval;
pub mod fakes;
pub mod literature;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod stage;
pub mod targeting;
pub mod telemetry;

pub use domain::{next_state, RailError, Result, RetryClass, StageError, Trigger};

pub use arena::{
    format_leaderboard, ArenaEntry, ArenaRanker, ArenaStats, ArenaWeights, Badge,
    LeaderboardFilter,
};
pub use completion::{CompletionRequest, CompletionService, HttpCompletionClient, SamplingParams};
pub use config::RailConfig;
pub use decision::{format_audit_log, DecisionRecorder};
pub use eval::{format_eval_report, EvaluationEngine, EvaluationReport};
pub use literature::{LiteratureSearch, NoLiterature, RelatedWork};
pub use orchestrator::{NewPaper, Orchestrator, OrchestratorBuilder, RunHandle, RunOutcome, Stores};
pub use progress::{ProgressBus, ProgressEvent, ProgressKind, ProgressSubscription};
pub use retry::{Attempt, RetryPolicy};
pub use stage::session::task_of;
pub use stage::{StageContext, StageKind, StageOutput, StageServices};
pub use targeting::checklist::{format_criteria, maturity_criteria, LevelCriteria};
pub use targeting::gates::{DomainGateRegistry, DomainGateSet, ImagingGates};
pub use targeting::TargetingEngine;
pub use telemetry::init_tracing;

pub use aixiv_state::{
    DecisionRecord, MaturityLevel, PaperId, PaperRecord, PaperSection, PaperState, RunId, RunKind,
    RunStatus, Scenario,
};
