//! Paper lifecycle transition table.
//!
//! ```text
//! submitted --review requested--> under_review
//! under_review | re_review --meta-review complete--> accepted | revision | rejected
//! revision --revision submitted (valid)--> re_review
//! accepted --arena promotion (level >= threshold)--> published_arena
//! ```
//!
//! Any other (state, trigger) pair fails with `GuardNotMet`.

use aixiv_state::{MaturityLevel, PaperState, Recommendation};

use super::error::{RailError, Result};

/// Event that may advance a paper's state, carrying its guard inputs.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    ReviewRequested,
    MetaReviewComplete(Recommendation),
    RevisionSubmitted {
        /// Outcome of structural validation; `Err` holds the reason
        validation: std::result::Result<(), String>,
    },
    ArenaPromotion {
        level: MaturityLevel,
        threshold: MaturityLevel,
    },
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::ReviewRequested => "review_requested",
            Trigger::MetaReviewComplete(_) => "meta_review_complete",
            Trigger::RevisionSubmitted { .. } => "revision_submitted",
            Trigger::ArenaPromotion { .. } => "arena_promotion",
        }
    }
}

fn guard_not_met(from: PaperState, trigger: &Trigger, reason: impl Into<String>) -> RailError {
    RailError::GuardNotMet {
        from,
        trigger: trigger.name().to_string(),
        reason: reason.into(),
    }
}

/// Resolve the next state for `trigger` applied in `from`.
pub fn next_state(from: PaperState, trigger: &Trigger) -> Result<PaperState> {
    use PaperState::*;

    match (from, trigger) {
        (Submitted, Trigger::ReviewRequested) => Ok(UnderReview),

        (UnderReview | ReReview, Trigger::MetaReviewComplete(rec)) => Ok(match rec {
            Recommendation::Accept => Accepted,
            Recommendation::Revise => Revision,
            Recommendation::Reject => Rejected,
        }),

        (Revision, Trigger::RevisionSubmitted { validation }) => match validation {
            Ok(()) => Ok(ReReview),
            Err(reason) => Err(guard_not_met(
                from,
                trigger,
                format!("revision failed structural validation: {reason}"),
            )),
        },

        (Accepted, Trigger::ArenaPromotion { level, threshold }) => {
            if level >= threshold {
                Ok(PublishedArena)
            } else {
                Err(guard_not_met(
                    from,
                    trigger,
                    format!("maturity {level} below arena threshold {threshold}"),
                ))
            }
        }

        _ => Err(guard_not_met(
            from,
            trigger,
            format!("no transition from {from} on {}", trigger.name()),
        )),
    }
}
