//! Fans a unit of work out over many hosts
//!
//! Every strategy is the same loop: hosts are split into groups (one group
//! unless the strategy is grouped) and every unit runs as its own task.
//! Sequential runs await each task before spawning the next and stop at the
//! first failure; the others spawn a whole group, gated by an optional
//! semaphore.
//! Join handles are awaited in host order, so outcomes and failures come back
//! in the order the hosts were given.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleetexec_exec::{ExecError, Host};
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{AggregateFailure, CoreError, HostFailure};
use crate::event::RunEvent;
use crate::state::{RunState, UnitState};
use crate::strategy::{FailureMode, Policy, Strategy};
use crate::work::{BackendFactory, Work};

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// One host's successful result
#[derive(Debug, Clone)]
pub struct HostOutcome<T> {
    pub index: usize,
    pub host: Arc<Host>,
    pub value: T,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Result of a run where no host failed
#[derive(Debug, Clone)]
pub struct RunReport<T> {
    pub strategy: Strategy,
    pub state: RunState,
    /// In host order
    pub outcomes: Vec<HostOutcome<T>>,
}

impl<T> RunReport<T> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Values in host order
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.outcomes.iter().map(|o| &o.value)
    }

    pub fn into_values(self) -> Vec<T> {
        self.outcomes.into_iter().map(|o| o.value).collect()
    }
}

/// Runs work across hosts and reports progress on a broadcast channel
pub struct Coordinator {
    factory: Arc<dyn BackendFactory>,
    event_tx: broadcast::Sender<RunEvent>,
}

impl Coordinator {
    #[must_use]
    pub fn new(factory: Arc<dyn BackendFactory>) -> Self {
        Self::with_event_capacity(factory, DEFAULT_EVENT_CAPACITY)
    }

    /// Create with a custom event channel capacity
    #[must_use]
    pub fn with_event_capacity(factory: Arc<dyn BackendFactory>, capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self { factory, event_tx }
    }

    /// Subscribe to run events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.event_tx.subscribe()
    }

    /// Run `work` once per host under `strategy`
    ///
    /// # Errors
    /// - `CoreError::InvalidStrategy` before anything starts
    /// - `CoreError::Unit` with the first failure of a sequential run
    /// - `CoreError::Aggregate` when any host of a concurrent run fails
    #[instrument(skip(self, hosts, work), fields(hosts = hosts.len()))]
    pub async fn run<W: Work>(
        &self,
        hosts: &[Host],
        strategy: Strategy,
        work: Arc<W>,
    ) -> Result<RunReport<W::Output>, CoreError> {
        let policy = strategy.policy()?;
        let hosts: Vec<Arc<Host>> = hosts.iter().cloned().map(Arc::new).collect();

        let mut state = RunState::Idle;
        self.transition_run(&mut state, RunState::Running);
        info!(total_hosts = hosts.len(), "starting run");

        let result = self.drive(&hosts, policy, &work).await;

        let finished = match result {
            Err(CoreError::Unit(_)) => RunState::Aborted,
            _ => RunState::Completed,
        };
        self.transition_run(&mut state, finished);

        match &result {
            Ok(outcomes) => info!(total = hosts.len(), completed = outcomes.len(), "run finished"),
            Err(CoreError::Aggregate(agg)) => warn!(
                total = hosts.len(),
                completed = agg.succeeded.len(),
                failed = agg.failures.len(),
                skipped = agg.skipped.len(),
                "run finished with failures"
            ),
            Err(e) => warn!(error = %e, "run aborted"),
        }

        result.map(|outcomes| RunReport {
            strategy,
            state,
            outcomes,
        })
    }

    async fn drive<W: Work>(
        &self,
        hosts: &[Arc<Host>],
        policy: Policy,
        work: &Arc<W>,
    ) -> Result<Vec<HostOutcome<W::Output>>, CoreError> {
        let group_size = policy.group_size.unwrap_or(hosts.len()).max(1);
        let limiter = policy
            .concurrency
            .map(|permits| Arc::new(Semaphore::new(permits)));

        let mut outcomes = Vec::with_capacity(hosts.len());
        let mut failures = Vec::new();

        for (group, batch) in hosts.chunks(group_size).enumerate() {
            let offset = group * group_size;

            match policy.on_failure {
                FailureMode::Abort => {
                    for (i, host) in batch.iter().enumerate() {
                        let index = offset + i;
                        let handle = self.spawn_unit(index, host, work, None);
                        outcomes.push(self.join_unit(index, host, handle).await?);
                    }
                }
                FailureMode::Collect => {
                    let handles: Vec<(usize, JoinHandle<_>)> = batch
                        .iter()
                        .enumerate()
                        .map(|(i, host)| {
                            let index = offset + i;
                            let handle = self.spawn_unit(index, host, work, limiter.clone());
                            (index, handle)
                        })
                        .collect();

                    for (index, handle) in handles {
                        let host = &hosts[index];
                        match self.join_unit(index, host, handle).await {
                            Ok(outcome) => outcomes.push(outcome),
                            Err(error) => failures.push(HostFailure {
                                host: Arc::clone(host),
                                error,
                            }),
                        }
                    }
                }
            }

            if policy.group_size.is_some() {
                let group_failed = failures.len();
                let _ = self.event_tx.send(RunEvent::GroupFinished {
                    group,
                    hosts: batch.len(),
                    failed: group_failed,
                });
                debug!(group, hosts = batch.len(), failed = group_failed, "group finished");
            }

            if !failures.is_empty() {
                let skipped = hosts[offset + batch.len()..].to_vec();
                return Err(CoreError::Aggregate(AggregateFailure {
                    failures,
                    succeeded: outcomes.into_iter().map(|o| o.host).collect(),
                    skipped,
                }));
            }
        }

        Ok(outcomes)
    }

    fn spawn_unit<W: Work>(
        &self,
        index: usize,
        host: &Arc<Host>,
        work: &Arc<W>,
        limiter: Option<Arc<Semaphore>>,
    ) -> JoinHandle<Result<HostOutcome<W::Output>, ExecError>> {
        let factory = Arc::clone(&self.factory);
        let events = self.event_tx.clone();
        let host = Arc::clone(host);
        let work = Arc::clone(work);

        tokio::spawn(async move {
            // Queued hosts stay pending until a permit frees up
            let _permit = match limiter {
                Some(semaphore) => Some(semaphore.acquire_owned().await.map_err(ExecError::unit)?),
                None => None,
            };
            run_unit(factory, events, index, host, work).await
        })
    }

    /// Await a unit's task; a panic counts as that host's failure
    async fn join_unit<T>(
        &self,
        index: usize,
        host: &Arc<Host>,
        handle: JoinHandle<Result<HostOutcome<T>, ExecError>>,
    ) -> Result<HostOutcome<T>, ExecError> {
        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(host = %host, error = %e, "task panicked");
                let _ = self.event_tx.send(RunEvent::UnitStateChanged {
                    index,
                    host: Arc::clone(host),
                    from: UnitState::Running,
                    to: UnitState::Failed,
                });
                Err(ExecError::unit(format!("worker panicked: {e}")))
            }
        }
    }

    fn transition_run(&self, state: &mut RunState, to: RunState) {
        debug_assert!(state.can_transition_to(to), "{state} -> {to}");
        let from = *state;
        *state = to;
        info!(from = %from, to = %to, "run state transition");
        // No subscribers is fine
        let _ = self.event_tx.send(RunEvent::RunStateChanged { from, to });
    }
}

/// Tracks one unit's state and publishes every transition
struct UnitTracker {
    index: usize,
    host: Arc<Host>,
    state: UnitState,
    events: broadcast::Sender<RunEvent>,
}

impl UnitTracker {
    fn transition_to(&mut self, to: UnitState) {
        debug_assert!(self.state.can_transition_to(to), "{} -> {to}", self.state);
        let from = self.state;
        self.state = to;
        debug!(host = %self.host, from = %from, to = %to, "unit state transition");
        let _ = self.events.send(RunEvent::UnitStateChanged {
            index: self.index,
            host: Arc::clone(&self.host),
            from,
            to,
        });
    }
}

async fn run_unit<W: Work>(
    factory: Arc<dyn BackendFactory>,
    events: broadcast::Sender<RunEvent>,
    index: usize,
    host: Arc<Host>,
    work: Arc<W>,
) -> Result<HostOutcome<W::Output>, ExecError> {
    let mut unit = UnitTracker {
        index,
        host: Arc::clone(&host),
        state: UnitState::Pending,
        events,
    };
    unit.transition_to(UnitState::Running);
    let started_at = Utc::now();

    let result = match factory.create(Arc::clone(&host)).await {
        Ok(backend) => {
            let result = work.run(backend.as_ref()).await;
            if let Err(e) = backend.finish().await {
                warn!(host = %host, error = %e, "failed to release backend");
            }
            result
        }
        Err(e) => Err(e),
    };
    let finished_at = Utc::now();

    match result {
        Ok(value) => {
            unit.transition_to(UnitState::Succeeded);
            Ok(HostOutcome {
                index,
                host,
                value,
                started_at,
                finished_at,
            })
        }
        Err(e) => {
            error!(host = %host, error = %e, "unit of work failed");
            unit.transition_to(UnitState::Failed);
            Err(e)
        }
    }
}
