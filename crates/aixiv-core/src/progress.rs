//! Progress stream for active pipeline runs.
//!
//! The orchestrator publishes onto a broadcast bus and never waits on
//! subscribers. Each event carries `(run_id, seq)`; `seq` increases by one
//! per event within a run. The bus also keeps a bounded replay log per run:
//! a subscriber that lags behind the channel is re-fed the events it
//! missed, and [`ProgressSubscription`] drops anything at or below the
//! last `seq` it delivered for that run.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use aixiv_state::{PaperId, RunId, RunStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Replay depth per run
const EVENTS_PER_RUN: usize = 512;

/// Completed runs kept for replay
const RETAINED_RUNS: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressKind {
    StageStarted {
        stage: String,
        attempt: u32,
    },
    StageSucceeded {
        stage: String,
        attempt: u32,
    },
    StageFailed {
        stage: String,
        attempt: u32,
        error: String,
        will_retry: bool,
    },
    RunCompleted {
        status: RunStatus,
    },
}

impl ProgressKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProgressKind::StageStarted { .. } => "stage_started",
            ProgressKind::StageSucceeded { .. } => "stage_succeeded",
            ProgressKind::StageFailed { .. } => "stage_failed",
            ProgressKind::RunCompleted { .. } => "run_completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub run_id: RunId,
    pub paper_id: PaperId,
    /// 1-based, per run
    pub seq: u64,
    pub kind: ProgressKind,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProgressBus {
    sender: broadcast::Sender<ProgressEvent>,
    replay: Arc<Mutex<ReplayLog>>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            replay: Arc::new(Mutex::new(ReplayLog::default())),
        }
    }

    fn replay(&self) -> MutexGuard<'_, ReplayLog> {
        lock_replay(&self.replay)
    }

    /// Publish to current subscribers; having none is fine.
    pub fn publish(&self, event: ProgressEvent) {
        let kind = event.kind.name();
        // Recording and sending under one lock keeps subscribe() atomic
        // with respect to publishers.
        let mut replay = self.replay();
        replay.record(&event);
        match self.sender.send(event) {
            Ok(receivers) => debug!(kind, receivers, "progress published"),
            Err(_) => debug!(kind, "progress published (no receivers)"),
        }
    }

    /// Events published from now on. Runs already in flight continue from
    /// their current `seq`.
    pub fn subscribe(&self) -> ProgressSubscription {
        let replay = self.replay();
        let mut sub = ProgressSubscription::new(self.sender.subscribe(), Arc::clone(&self.replay), None);
        for (run_id, events) in &replay.runs {
            if replay.completed.contains(run_id) {
                sub.finish(run_id.clone());
            } else if let Some(last) = events.back() {
                sub.high_water.insert(run_id.clone(), last.seq);
            }
        }
        sub
    }

    /// Every event of one run, including those published before the call
    /// while the run is still retained. Ends after its `RunCompleted`.
    pub fn subscribe_run(&self, run_id: &RunId) -> ProgressSubscription {
        let replay = self.replay();
        let mut sub = ProgressSubscription::new(
            self.sender.subscribe(),
            Arc::clone(&self.replay),
            Some(run_id.clone()),
        );
        sub.pending.extend(replay.since(run_id, 0));
        sub
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    #[cfg(test)]
    fn retained_runs(&self) -> usize {
        self.replay().runs.len()
    }
}

fn lock_replay(replay: &Mutex<ReplayLog>) -> MutexGuard<'_, ReplayLog> {
    replay.lock().unwrap_or_else(|e| e.into_inner())
}

/// Recent events per run, used to re-deliver what a lagging or late
/// subscriber missed. Runs in flight are always kept; the last
/// [`RETAINED_RUNS`] completed runs are kept after that.
#[derive(Debug, Default)]
struct ReplayLog {
    runs: HashMap<RunId, VecDeque<ProgressEvent>>,
    completed: VecDeque<RunId>,
}

impl ReplayLog {
    fn record(&mut self, event: &ProgressEvent) {
        let events = self.runs.entry(event.run_id.clone()).or_default();
        if events.len() == EVENTS_PER_RUN {
            events.pop_front();
        }
        events.push_back(event.clone());

        if matches!(event.kind, ProgressKind::RunCompleted { .. })
            && !self.completed.contains(&event.run_id)
        {
            self.completed.push_back(event.run_id.clone());
            while self.completed.len() > RETAINED_RUNS {
                if let Some(evicted) = self.completed.pop_front() {
                    self.runs.remove(&evicted);
                }
            }
        }
    }

    fn since(&self, run_id: &RunId, after: u64) -> Vec<ProgressEvent> {
        self.runs
            .get(run_id)
            .map(|events| events.iter().filter(|e| e.seq > after).cloned().collect())
            .unwrap_or_default()
    }
}

/// Cancellable view of the bus. Dropping it cancels too.
#[derive(Debug)]
pub struct ProgressSubscription {
    receiver: Option<broadcast::Receiver<ProgressEvent>>,
    replay: Arc<Mutex<ReplayLog>>,
    run_id: Option<RunId>,
    /// Replayed events handed out before reading the channel again
    pending: VecDeque<ProgressEvent>,
    /// Highest `seq` delivered per run still in flight
    high_water: HashMap<RunId, u64>,
    /// Runs whose `RunCompleted` was delivered, oldest first
    finished: VecDeque<RunId>,
}

impl ProgressSubscription {
    fn new(
        receiver: broadcast::Receiver<ProgressEvent>,
        replay: Arc<Mutex<ReplayLog>>,
        run_id: Option<RunId>,
    ) -> Self {
        Self {
            receiver: Some(receiver),
            replay,
            run_id,
            pending: VecDeque::new(),
            high_water: HashMap::new(),
            finished: VecDeque::new(),
        }
    }

    /// Next unseen event, or `None` once cancelled, closed or (for a
    /// run-scoped subscription) after the run completed.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                if self.accept(&event) {
                    return Some(event);
                }
                continue;
            }

            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(event) => {
                    if self.accept(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.refill();
                    warn!(
                        skipped,
                        replayed = self.pending.len(),
                        "progress subscriber lagged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Filter, de-duplicate and track delivery of one event.
    fn accept(&mut self, event: &ProgressEvent) -> bool {
        if self.run_id.as_ref().is_some_and(|r| r != &event.run_id) {
            return false;
        }
        if self.finished.contains(&event.run_id) {
            return false;
        }
        let last = self.high_water.get(&event.run_id).copied().unwrap_or(0);
        if event.seq <= last {
            return false;
        }

        if matches!(event.kind, ProgressKind::RunCompleted { .. }) {
            self.finish(event.run_id.clone());
            if self.run_id.is_some() {
                self.receiver = None;
            }
        } else {
            self.high_water.insert(event.run_id.clone(), event.seq);
        }
        true
    }

    fn finish(&mut self, run_id: RunId) {
        self.high_water.remove(&run_id);
        self.finished.push_back(run_id);
        if self.finished.len() > RETAINED_RUNS {
            self.finished.pop_front();
        }
    }

    /// Queue retained events newer than what this subscription delivered.
    fn refill(&mut self) {
        let replay = lock_replay(&self.replay);
        let runs: Vec<RunId> = match &self.run_id {
            Some(run_id) => vec![run_id.clone()],
            None => replay.runs.keys().cloned().collect(),
        };
        for run_id in runs {
            if self.finished.contains(&run_id) {
                continue;
            }
            let after = self.high_water.get(&run_id).copied().unwrap_or(0);
            self.pending.extend(replay.since(&run_id, after));
        }
    }

    pub fn cancel(&mut self) {
        self.receiver = None;
        self.pending.clear();
    }

    pub fn is_cancelled(&self) -> bool {
        self.receiver.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn event(run: &str, seq: u64, kind: ProgressKind) -> ProgressEvent {
        ProgressEvent {
            run_id: RunId::from(run),
            paper_id: PaperId::from("p1"),
            seq,
            kind,
            at: Utc::now(),
        }
    }

    fn started(stage: &str) -> ProgressKind {
        ProgressKind::StageStarted {
            stage: stage.to_string(),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn duplicates_are_dropped() {
        let bus = ProgressBus::new();
        let mut sub = bus.subscribe();
        bus.publish(event("r1", 1, started("review")));
        bus.publish(event("r1", 1, started("review")));
        bus.publish(event("r1", 2, started("redteam")));

        assert_eq!(sub.next().await.unwrap().seq, 1);
        assert_eq!(sub.next().await.unwrap().seq, 2);
    }

    #[tokio::test]
    async fn run_scoped_subscription_ends_after_completion() {
        let bus = ProgressBus::new();
        let mut sub = bus.subscribe_run(&RunId::from("r2"));
        bus.publish(event("r1", 1, started("idea")));
        bus.publish(event("r2", 1, started("review")));
        bus.publish(event(
            "r2",
            2,
            ProgressKind::RunCompleted {
                status: RunStatus::Succeeded,
            },
        ));

        assert_eq!(sub.next().await.unwrap().run_id, RunId::from("r2"));
        assert_eq!(sub.next().await.unwrap().kind.name(), "run_completed");
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn cancelled_subscription_yields_nothing() {
        let bus = ProgressBus::new();
        let mut sub = bus.subscribe();
        sub.cancel();
        bus.publish(event("r1", 1, started("idea")));
        assert!(sub.next().await.is_none());
        assert_eq!(bus.subscriber_count(), 0);
    }

    fn completed(run: &str, seq: u64) -> ProgressEvent {
        event(
            run,
            seq,
            ProgressKind::RunCompleted {
                status: RunStatus::Succeeded,
            },
        )
    }

    #[tokio::test]
    async fn lagging_run_subscription_replays_and_ends() {
        let bus = ProgressBus::new();
        let mut sub = bus.subscribe_run(&RunId::from("r1"));
        bus.publish(event("r1", 1, started("review")));
        bus.publish(completed("r1", 2));
        for seq in 1..=300 {
            bus.publish(event("r2", seq, started("idea")));
        }

        let first = tokio::time::timeout(Duration::from_millis(500), sub.next())
            .await
            .expect("subscription must not hang")
            .unwrap();
        assert_eq!((first.run_id.as_str(), first.seq), ("r1", 1));
        let last = sub.next().await.unwrap();
        assert_eq!(last.kind.name(), "run_completed");
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn lagging_subscription_sees_every_event_once() {
        let bus = ProgressBus::new();
        let mut sub = bus.subscribe();
        for seq in 1..=400 {
            bus.publish(event("r1", seq, started("review")));
        }
        bus.publish(completed("r1", 401));

        let mut seqs = Vec::new();
        while let Some(e) = sub.next().await {
            seqs.push(e.seq);
            if e.kind.name() == "run_completed" {
                break;
            }
        }
        assert_eq!(seqs, (1..=401).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn late_run_subscription_starts_from_the_first_event() {
        let bus = ProgressBus::new();
        bus.publish(event("r1", 1, started("idea")));
        bus.publish(event("r1", 2, started("literature")));

        let mut sub = bus.subscribe_run(&RunId::from("r1"));
        bus.publish(completed("r1", 3));

        let mut seqs = Vec::new();
        while let Some(e) = sub.next().await {
            seqs.push(e.seq);
        }
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn global_subscription_skips_history() {
        let bus = ProgressBus::new();
        bus.publish(event("r1", 1, started("idea")));
        bus.publish(completed("r2", 1));

        let mut sub = bus.subscribe();
        bus.publish(event("r1", 2, started("literature")));
        let e = sub.next().await.unwrap();
        assert_eq!((e.run_id.as_str(), e.seq), ("r1", 2));
    }

    #[test]
    fn completed_runs_are_evicted_from_replay() {
        let bus = ProgressBus::new();
        for i in 0..(RETAINED_RUNS + 10) {
            bus.publish(completed(&format!("r{i}"), 1));
        }
        bus.publish(event("active", 1, started("idea")));
        assert_eq!(bus.retained_runs(), RETAINED_RUNS + 1);
    }

    #[tokio::test]
    async fn finished_runs_are_not_tracked_forever() {
        let bus = ProgressBus::new();
        let mut sub = bus.subscribe();
        for i in 0..(RETAINED_RUNS * 2) {
            bus.publish(event(&format!("r{i}"), 1, started("idea")));
            bus.publish(completed(&format!("r{i}"), 2));
            sub.next().await.unwrap();
            sub.next().await.unwrap();
        }
        assert!(sub.high_water.is_empty());
        assert_eq!(sub.finished.len(), RETAINED_RUNS);
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        ProgressBus::new().publish(event("r1", 1, started("idea")));
    }
}
