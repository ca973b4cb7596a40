//! Task executor (spec §4.3): a single-threaded cooperative scheduler
//! over an arena of [`TaskKind`]s, driven by the readiness multiplexer.

pub mod multiplexer;

use crate::core::clock::Clock;
use crate::core::metadata::MetadataStore;
use crate::core::signals::SignalFlags;
use crate::core::sql::RetryPolicy;
use crate::core::task::{StepOutcome, TaskId, TaskKind, TaskResult};
use multiplexer::Multiplexer;
use std::io;
use std::time::{Duration, Instant};

pub struct Executor {
    tasks: Vec<Option<TaskKind>>,
    /// Ids of tasks currently scheduled by deadline rather than by
    /// socket readiness. A task is in exactly this list xor registered
    /// with `multiplexer`, never both (spec §4.3 step 3).
    time_list: Vec<TaskId>,
    unfinished: usize,
    multiplexer: Multiplexer,
    retry: RetryPolicy,
    signals: SignalFlags,
}

impl Executor {
    pub fn new(retry: RetryPolicy, signals: SignalFlags) -> io::Result<Self> {
        Ok(Self {
            tasks: Vec::new(),
            time_list: Vec::new(),
            unfinished: 0,
            multiplexer: Multiplexer::new()?,
            retry,
            signals,
        })
    }

    /// Admits a task and returns its stable id. The task's own
    /// `wake_time` (already initialized by its constructor, per spec
    /// §4.4's "dispatch hint") is what first schedules it.
    pub fn spawn(&mut self, task: TaskKind) -> TaskId {
        let id = self.tasks.len();
        self.tasks.push(Some(task));
        self.time_list.push(id);
        self.unfinished += 1;
        id
    }

    pub fn unfinished_count(&self) -> usize {
        self.unfinished
    }

    /// Runs until every task has reached `DONE` or a signal is observed
    /// pending (spec §4.3 step 5). Never retries a `FAILED` task — any
    /// retry policy lives inside the task's own `step` function.
    pub fn run(&mut self, clock: &dyn Clock, metadata: &mut dyn MetadataStore) -> io::Result<()> {
        while self.unfinished > 0 && !self.signals.any_pending() {
            let now = clock.now();
            let timeout = Self::compute_timeout(self.time_list.iter().filter_map(|&id| self.wake_time_of(id)), now);
            let socket_ready = self.multiplexer.wait(timeout, &self.signals)?;
            if self.signals.any_pending() {
                break;
            }
            let now = clock.now();
            let dispatch = Self::dispatch_set(&self.time_list, |id| self.wake_time_of(id), now, &socket_ready);
            for id in dispatch {
                self.step_one(id, clock, metadata)?;
            }
        }
        Ok(())
    }

    fn wake_time_of(&self, id: TaskId) -> Option<Instant> {
        self.tasks.get(id).and_then(|t| t.as_ref()).map(|t| t.wake_time())
    }

    fn step_one(&mut self, id: TaskId, clock: &dyn Clock, metadata: &mut dyn MetadataStore) -> io::Result<()> {
        let Some(task) = self.tasks[id].as_mut() else {
            return Ok(());
        };
        match task.step(clock, &self.retry, metadata) {
            StepOutcome::WakeAt(_) => {
                self.time_list.retain(|&t| t != id);
                self.time_list.push(id);
            }
            StepOutcome::WaitOnSocket => {
                self.time_list.retain(|&t| t != id);
                if let Some(source) = task.registrable_socket() {
                    self.multiplexer.register(id, source)?;
                }
            }
            StepOutcome::Done => {
                self.time_list.retain(|&t| t != id);
                task.release_connections();
                if task.result() != TaskResult::Failed {
                    tracing::info!(part = task.part_name(), "task done");
                }
                self.tasks[id] = None;
                self.unfinished -= 1;
            }
        }
        Ok(())
    }

    /// `max(0, min(wake_time) - now)`, or `None` (block indefinitely) if
    /// nothing is scheduled by deadline.
    fn compute_timeout(wake_times: impl Iterator<Item = Instant>, now: Instant) -> Option<Duration> {
        wake_times.min().map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Every task whose deadline has passed, plus every task a socket
    /// event woke, deduplicated. A socket event and a passed deadline
    /// landing in the same iteration both get dispatched exactly once.
    fn dispatch_set(
        time_list: &[TaskId],
        wake_time_of: impl Fn(TaskId) -> Option<Instant>,
        now: Instant,
        socket_ready: &[TaskId],
    ) -> Vec<TaskId> {
        let mut dispatch: Vec<TaskId> = time_list
            .iter()
            .copied()
            .filter(|&id| wake_time_of(id).is_some_and(|w| w <= now))
            .collect();
        for &id in socket_ready {
            if !dispatch.contains(&id) {
                dispatch.push(id);
            }
        }
        dispatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_timeout_is_none_when_nothing_scheduled() {
        let now = Instant::now();
        assert_eq!(Executor::compute_timeout(std::iter::empty(), now), None);
    }

    #[test]
    fn compute_timeout_clamps_to_zero_for_overdue_deadlines() {
        let now = Instant::now();
        let overdue = now - Duration::from_secs(1);
        assert_eq!(Executor::compute_timeout(std::iter::once(overdue), now), Some(Duration::ZERO));
    }

    #[test]
    fn compute_timeout_picks_the_soonest_deadline() {
        let now = Instant::now();
        let soon = now + Duration::from_millis(50);
        let later = now + Duration::from_secs(5);
        assert_eq!(
            Executor::compute_timeout(vec![later, soon].into_iter(), now),
            Some(Duration::from_millis(50))
        );
    }

    #[test]
    fn dispatch_set_includes_overdue_and_socket_ready_without_duplicates() {
        let now = Instant::now();
        let wake = |id: TaskId| -> Option<Instant> {
            match id {
                1 => Some(now - Duration::from_millis(1)),
                2 => Some(now + Duration::from_secs(5)),
                3 => Some(now - Duration::from_millis(1)),
                _ => None,
            }
        };
        let dispatch = Executor::dispatch_set(&[1, 2, 3], wake, now, &[3, 4]);
        assert_eq!(dispatch, vec![1, 3, 4]);
    }

    #[test]
    fn spawn_tracks_unfinished_count() {
        use crate::core::clock::test_support::FakeClock;
        use crate::core::node::NodeId;
        use crate::core::sql::client::fake::ScriptedSession;

        let clock = FakeClock::new();
        let retry = RetryPolicy::new(Duration::from_secs(1), Duration::from_millis(50));
        let signals = SignalFlags::detached();
        let mut exec = Executor::new(retry, signals).unwrap();
        assert_eq!(exec.unfinished_count(), 0);

        let cp = crate::core::task::copy_partition::CopyPartitionState::new(
            "p1",
            "p1",
            NodeId(1),
            NodeId(2),
            "host=n1",
            "create table p1 (id int)",
            Box::new(ScriptedSession::new(vec![])),
            Box::new(ScriptedSession::new(vec![])),
            clock.now(),
        );
        let task = TaskKind::MovePart(crate::core::task::move_part::MovePartTask::new(
            cp, None, None, None, None, "", "", "", false,
        ));
        exec.spawn(task);
        assert_eq!(exec.unfinished_count(), 1);
    }
}
