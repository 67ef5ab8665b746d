use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};

use crate::error::{ExecutorError, TaskError};
use crate::events::{EventBus, RunEvent};

use super::graph::TaskGraph;
use super::state::{SkipReason, TaskState};
use super::types::{
    FailureReason, RunReport, RunStatus, Task, TaskContext, TaskRecord, Transition,
};

/// Result of one attempt, handed back from a worker to the engine loop.
struct AttemptOutcome {
    task_id: String,
    elapsed: Duration,
    result: Result<(), TaskError>,
}

/// Drives a validated [`TaskGraph`] to completion.
///
/// A single loop owns all task state. Workers only run task bodies and
/// report back through a `JoinSet`, so every transition is applied in one
/// place and in a deterministic order: ready tasks are dispatched by
/// ascending id while permits remain.
#[derive(Clone)]
pub struct RunEngine {
    max_parallel: usize,
    events: EventBus,
}

impl RunEngine {
    pub fn new(max_parallel: usize, events: EventBus) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            events,
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Execute every task in `graph`.
    ///
    /// Flipping `cancel` to `true` stops new dispatches: tasks not yet
    /// running are skipped, in-flight attempts finish, nothing is retried.
    pub async fn execute(
        &self,
        run_id: &str,
        graph: &TaskGraph<Task>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<RunReport, ExecutorError> {
        let stages = graph.topological_sort()?;
        let started_at = Utc::now();
        let mut run = RunState::new(run_id, graph, self.events.clone());

        tracing::info!(
            run_id = %run_id,
            tasks = graph.len(),
            stages = stages.len(),
            max_parallel = self.max_parallel,
            "run engine started"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut workers: JoinSet<AttemptOutcome> = JoinSet::new();
        let mut cancelled = *cancel.borrow();
        let mut cancel_open = true;

        loop {
            if cancelled {
                run.skip_waiting(SkipReason::Cancelled)?;
            } else {
                run.promote_ready()?;
                self.dispatch(&mut run, &semaphore, &mut workers)?;
            }

            if workers.is_empty() && (cancelled || !run.has_waiting()) {
                break;
            }

            let next_retry = if cancelled {
                None
            } else {
                run.next_retry_deadline()
            };

            tokio::select! {
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    let outcome = joined.map_err(|e| ExecutorError::WorkerLost(e.to_string()))?;
                    run.finish_attempt(outcome, cancelled)?;
                }
                _ = sleep_until(next_retry.unwrap_or_else(Instant::now)), if next_retry.is_some() => {}
                changed = cancel.changed(), if cancel_open && !cancelled => {
                    match changed {
                        Ok(()) => {
                            cancelled = *cancel.borrow();
                            if cancelled {
                                tracing::warn!(run_id = %run_id, "cancellation requested");
                            }
                        }
                        Err(_) => cancel_open = false,
                    }
                }
                else => break,
            }
        }

        run.settle_unsettled(cancelled)?;
        let status = run.final_status(cancelled);

        let report = RunReport {
            run_id: run_id.to_string(),
            status,
            tasks: run.records,
            timeline: run.timeline,
            stages,
            started_at,
            finished_at: Utc::now(),
        };

        tracing::info!(
            run_id = %run_id,
            success = report.status.is_success(),
            duration_ms = report.duration_ms(),
            "run engine finished"
        );

        Ok(report)
    }

    /// Start every runnable task, by ascending id, while permits remain.
    fn dispatch(
        &self,
        run: &mut RunState<'_>,
        semaphore: &Arc<Semaphore>,
        workers: &mut JoinSet<AttemptOutcome>,
    ) -> Result<(), ExecutorError> {
        let graph = run.graph;
        for task_id in run.runnable(Instant::now()) {
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                break;
            };
            let Some(task) = graph.nodes.get(&task_id) else {
                continue;
            };

            let attempt = run.start_attempt(&task_id)?;
            let runner = task.runner().clone();
            let timeout = task.timeout_duration();
            let ctx = TaskContext {
                run_id: run.run_id.clone(),
                task_id: task_id.clone(),
                attempt,
            };

            workers.spawn(async move {
                let _permit = permit;
                let started = Instant::now();
                let body = AssertUnwindSafe(runner.run(ctx)).catch_unwind();
                let result = match tokio::time::timeout(timeout, body).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(panic)) => Err(TaskError::fatal(format!(
                        "task panicked: {}",
                        panic_message(panic.as_ref())
                    ))),
                    Err(_) => Err(TaskError::Timeout(timeout)),
                };
                AttemptOutcome {
                    task_id,
                    elapsed: started.elapsed(),
                    result,
                }
            });
        }
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Mutable bookkeeping for one run. Owned by the engine loop only.
struct RunState<'g> {
    run_id: String,
    graph: &'g TaskGraph<Task>,
    events: EventBus,
    records: BTreeMap<String, TaskRecord>,
    timeline: Vec<Transition>,
    retry_at: BTreeMap<String, Instant>,
    first_failure: Option<FailureReason>,
}

impl<'g> RunState<'g> {
    fn new(run_id: &str, graph: &'g TaskGraph<Task>, events: EventBus) -> Self {
        let records = graph
            .nodes
            .keys()
            .map(|id| (id.clone(), TaskRecord::default()))
            .collect();
        Self {
            run_id: run_id.to_string(),
            graph,
            events,
            records,
            timeline: Vec::new(),
            retry_at: BTreeMap::new(),
            first_failure: None,
        }
    }

    fn state(&self, task_id: &str) -> TaskState {
        self.records
            .get(task_id)
            .map(|r| r.state)
            .unwrap_or(TaskState::Pending)
    }

    fn transition(
        &mut self,
        task_id: &str,
        to: TaskState,
        error: Option<String>,
    ) -> Result<(), ExecutorError> {
        let record = self.records.entry(task_id.to_string()).or_default();
        let from = record.state;
        if !from.can_transition_to(to) {
            return Err(ExecutorError::InvalidTransition {
                task_id: task_id.to_string(),
                from,
                to,
            });
        }
        record.state = to;
        let attempt = record.attempts;

        tracing::debug!(
            run_id = %self.run_id,
            task_id = %task_id,
            from = %from,
            to = %to,
            attempt,
            "task transition"
        );

        self.timeline.push(Transition {
            task_id: task_id.to_string(),
            from,
            to,
            attempt,
        });
        self.events.emit(RunEvent::TaskStateChanged {
            run_id: self.run_id.clone(),
            task_id: task_id.to_string(),
            from,
            to,
            attempt,
            error,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Move pending tasks whose dependencies all settled favourably to ready.
    fn promote_ready(&mut self) -> Result<(), ExecutorError> {
        let promotable: Vec<String> = self
            .records
            .iter()
            .filter(|(_, r)| r.state == TaskState::Pending)
            .filter(|(id, _)| {
                self.graph
                    .dependencies_of(id)
                    .iter()
                    .all(|dep| self.state(dep).satisfies_dependents())
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in promotable {
            self.transition(&id, TaskState::Ready, None)?;
        }
        Ok(())
    }

    /// Ready tasks plus retry-waiting tasks whose delay elapsed, by id.
    fn runnable(&self, now: Instant) -> Vec<String> {
        self.records
            .iter()
            .filter(|(id, r)| match r.state {
                TaskState::Ready => true,
                TaskState::RetryWait => self.retry_at.get(*id).is_some_and(|at| *at <= now),
                _ => false,
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn start_attempt(&mut self, task_id: &str) -> Result<u32, ExecutorError> {
        self.retry_at.remove(task_id);
        let record = self.records.entry(task_id.to_string()).or_default();
        record.attempts += 1;
        let attempt = record.attempts;
        self.transition(task_id, TaskState::Running, None)?;
        tracing::info!(run_id = %self.run_id, task_id = %task_id, attempt, "task started");
        Ok(attempt)
    }

    fn finish_attempt(
        &mut self,
        outcome: AttemptOutcome,
        cancelled: bool,
    ) -> Result<(), ExecutorError> {
        let AttemptOutcome {
            task_id,
            elapsed,
            result,
        } = outcome;

        let attempts = {
            let record = self.records.entry(task_id.clone()).or_default();
            record.duration_ms += elapsed.as_millis() as u64;
            record.attempts
        };

        let err = match result {
            Ok(()) => {
                tracing::info!(
                    run_id = %self.run_id,
                    task_id = %task_id,
                    attempt = attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "task succeeded"
                );
                return self.transition(&task_id, TaskState::Succeeded, None);
            }
            Err(err) => err,
        };

        if let Some(record) = self.records.get_mut(&task_id) {
            record.last_error = Some(err.to_string());
        }

        let Some(task) = self.graph.nodes.get(&task_id) else {
            return self.transition(&task_id, TaskState::Failed, Some(err.to_string()));
        };
        let strategy = task.retry_strategy().clone();
        let budget = task.attempt_budget();

        if !cancelled && strategy.should_retry(attempts, budget, &err) {
            let delay = strategy.next_delay(attempts.saturating_sub(1), &err);
            tracing::warn!(
                run_id = %self.run_id,
                task_id = %task_id,
                attempt = attempts,
                max_attempts = budget,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "task failed, retry scheduled"
            );
            self.transition(&task_id, TaskState::RetryWait, Some(err.to_string()))?;
            self.retry_at.insert(task_id.clone(), Instant::now() + delay);
            self.events.emit(RunEvent::RetryScheduled {
                run_id: self.run_id.clone(),
                task_id,
                attempt: attempts,
                delay_ms: delay.as_millis() as u64,
                error: err.to_string(),
                timestamp: Utc::now(),
            });
            return Ok(());
        }

        tracing::error!(
            run_id = %self.run_id,
            task_id = %task_id,
            attempts,
            error = %err,
            "task failed"
        );
        self.transition(&task_id, TaskState::Failed, Some(err.to_string()))?;
        if self.first_failure.is_none() {
            self.first_failure = Some(FailureReason::TaskFailed {
                task_id: task_id.clone(),
                attempts,
                error: err.to_string(),
            });
        }

        for dependent in self.graph.descendants(&task_id) {
            if self.state(&dependent) == TaskState::Pending {
                self.skip(
                    &dependent,
                    SkipReason::UpstreamFailed {
                        task_id: task_id.clone(),
                    },
                )?;
            }
        }
        Ok(())
    }

    fn skip(&mut self, task_id: &str, reason: SkipReason) -> Result<(), ExecutorError> {
        self.retry_at.remove(task_id);
        self.transition(task_id, TaskState::Skipped, None)?;
        if let Some(record) = self.records.get_mut(task_id) {
            record.skip_reason = Some(reason);
        }
        Ok(())
    }

    /// Skip everything that has not started yet.
    fn skip_waiting(&mut self, reason: SkipReason) -> Result<(), ExecutorError> {
        let waiting: Vec<String> = self
            .records
            .iter()
            .filter(|(_, r)| {
                matches!(
                    r.state,
                    TaskState::Pending | TaskState::Ready | TaskState::RetryWait
                )
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in waiting {
            self.skip(&id, reason.clone())?;
        }
        Ok(())
    }

    fn has_waiting(&self) -> bool {
        self.records
            .values()
            .any(|r| matches!(r.state, TaskState::Ready | TaskState::RetryWait))
    }

    /// Earliest retry deadline, including ones already due: sleeping until
    /// a past instant wakes the loop at once.
    fn next_retry_deadline(&self) -> Option<Instant> {
        self.retry_at.values().copied().min()
    }

    fn unsettled(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|(_, r)| !r.state.is_terminal())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Skip whatever the loop left behind. Outside cancellation that is a
    /// stalled run, which fails on the first task left unrun.
    fn settle_unsettled(&mut self, cancelled: bool) -> Result<(), ExecutorError> {
        let reason = if cancelled {
            SkipReason::Cancelled
        } else {
            SkipReason::Stalled
        };
        for id in self.unsettled() {
            tracing::warn!(run_id = %self.run_id, task_id = %id, "task never ran");
            if !cancelled && self.first_failure.is_none() {
                self.first_failure = Some(FailureReason::TaskFailed {
                    task_id: id.clone(),
                    attempts: self.records.get(&id).map(|r| r.attempts).unwrap_or(0),
                    error: "run stalled before the task could run".to_string(),
                });
            }
            if self.state(&id) == TaskState::Running {
                continue;
            }
            self.skip(&id, reason.clone())?;
        }
        Ok(())
    }

    /// First task failure wins, then cancellation.
    fn final_status(&mut self, cancelled: bool) -> RunStatus {
        match (self.first_failure.take(), cancelled) {
            (Some(reason), _) => RunStatus::Failed { reason },
            (None, true) => RunStatus::Failed {
                reason: FailureReason::Cancelled,
            },
            (None, false) => RunStatus::Succeeded,
        }
    }
}
