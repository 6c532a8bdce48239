//! In-process reservation of papers with an active run.
//!
//! Acquisition is synchronous, so of two concurrent starts for one paper
//! exactly one gets the guard before either reaches an await point. The
//! run ledger enforces the same invariant for persisted runs.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use aixiv_state::PaperId;

use crate::domain::error::{RailError, Result};

#[derive(Debug, Clone, Default)]
pub(crate) struct ActiveRuns {
    papers: Arc<Mutex<HashSet<PaperId>>>,
}

impl ActiveRuns {
    fn papers(&self) -> MutexGuard<'_, HashSet<PaperId>> {
        self.papers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn acquire(&self, paper_id: &PaperId) -> Result<PaperGuard> {
        if !self.papers().insert(paper_id.clone()) {
            return Err(RailError::RunAlreadyActive {
                paper_id: paper_id.to_string(),
            });
        }
        Ok(PaperGuard {
            runs: self.clone(),
            paper_id: paper_id.clone(),
        })
    }

    pub(crate) fn is_active(&self, paper_id: &PaperId) -> bool {
        self.papers().contains(paper_id)
    }
}

/// Held for the lifetime of a run or a direct lifecycle mutation.
#[derive(Debug)]
pub(crate) struct PaperGuard {
    runs: ActiveRuns,
    paper_id: PaperId,
}

impl Drop for PaperGuard {
    fn drop(&mut self) {
        self.runs.papers().remove(&self.paper_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let runs = ActiveRuns::default();
        let pid = PaperId::from("p1");
        let guard = runs.acquire(&pid).unwrap();
        assert!(matches!(
            runs.acquire(&pid),
            Err(RailError::RunAlreadyActive { .. })
        ));
        assert!(runs.acquire(&PaperId::from("p2")).is_ok());

        drop(guard);
        assert!(!runs.is_active(&pid));
        assert!(runs.acquire(&pid).is_ok());
    }
}
