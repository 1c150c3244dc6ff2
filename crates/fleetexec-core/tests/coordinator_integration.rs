//! Integration tests for the coordinator strategies
//!
//! Uses a scripted backend so failures, timing and concurrency are controlled.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fleetexec_core::{
    BackendFactory, Coordinator, CoreError, RunEvent, RunState, Strategy, UnitState, Work,
    work_fn,
};
use fleetexec_exec::{
    Backend, BackendConfig, Command, CommandOptions, ExecError, ExitStatus, Host, OutputStream,
};

/// Shared record of what the scripted backends did
#[derive(Default)]
struct Recorder {
    active: AtomicUsize,
    peak: AtomicUsize,
    log: Mutex<Vec<String>>,
    failing: HashSet<String>,
    unreachable: HashSet<String>,
    delay: Duration,
}

impl Recorder {
    fn new(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            ..Self::default()
        }
    }

    fn failing(mut self, hosts: &[&str]) -> Self {
        self.failing = hosts.iter().map(ToString::to_string).collect();
        self
    }

    fn unreachable(mut self, hosts: &[&str]) -> Self {
        self.unreachable = hosts.iter().map(ToString::to_string).collect();
        self
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn started(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|entry| entry.strip_prefix("start:").map(ToString::to_string))
            .collect()
    }
}

struct ScriptedBackend {
    host: Arc<Host>,
    config: Arc<BackendConfig>,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn host(&self) -> &Arc<Host> {
        &self.host
    }

    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn backend_type(&self) -> &'static str {
        "scripted"
    }

    async fn execute_command(&self, command: &mut Command) -> Result<(), ExecError> {
        let name = self.host.address().to_string();
        self.recorder.log.lock().unwrap().push(format!("start:{name}"));

        let now = self.recorder.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorder.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.recorder.delay).await;
        self.recorder.active.fetch_sub(1, Ordering::SeqCst);

        let code = if self.recorder.failing.contains(&name) {
            command.record_output(OutputStream::Stderr, b"deploy failed\n");
            1
        } else {
            command.record_output(OutputStream::Stdout, name.as_bytes());
            0
        };
        command.complete(ExitStatus::Code(code), self.recorder.delay)?;

        self.recorder.log.lock().unwrap().push(format!("end:{name}"));
        Ok(())
    }
}

struct ScriptedFactory {
    recorder: Arc<Recorder>,
}

#[async_trait]
impl BackendFactory for ScriptedFactory {
    async fn create(&self, host: Arc<Host>) -> Result<Box<dyn Backend>, ExecError> {
        if self.recorder.unreachable.contains(host.address()) {
            return Err(ExecError::ConnectionError(format!("{host}: no route to host")));
        }
        Ok(Box::new(ScriptedBackend {
            host,
            config: Arc::new(BackendConfig::default()),
            recorder: Arc::clone(&self.recorder),
        }))
    }
}

fn setup(recorder: Recorder) -> (Coordinator, Arc<Recorder>) {
    let recorder = Arc::new(recorder);
    let factory = ScriptedFactory {
        recorder: Arc::clone(&recorder),
    };
    (Coordinator::new(Arc::new(factory)), recorder)
}

fn hosts(names: &[&str]) -> Vec<Host> {
    names.iter().map(|n| Host::new(*n)).collect()
}

fn names(hosts: &[Arc<Host>]) -> Vec<&str> {
    hosts.iter().map(|h| h.address()).collect()
}

fn deploy() -> Arc<impl Work<Output = String>> {
    Arc::new(work_fn(|backend| {
        Box::pin(async move {
            backend
                .capture("deploy", &["--now"], CommandOptions::default())
                .await
        })
    }))
}

#[tokio::test]
async fn test_sequential_stops_at_first_failure() {
    let (coordinator, recorder) = setup(Recorder::new(1).failing(&["b"]));
    let mut events = coordinator.subscribe();

    let err = coordinator
        .run(&hosts(&["a", "b", "c"]), Strategy::Sequential, deploy())
        .await
        .unwrap_err();

    // The unit's own error comes back unwrapped
    match err {
        CoreError::Unit(ExecError::CommandFailed {
            host,
            status,
            stderr,
            ..
        }) => {
            assert_eq!(host, "b");
            assert_eq!(status, 1);
            assert_eq!(stderr, "deploy failed\n");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(recorder.started(), vec!["a", "b"]);

    let mut last_run_state = None;
    while let Ok(event) = events.try_recv() {
        if let RunEvent::RunStateChanged { to, .. } = event {
            last_run_state = Some(to);
        }
    }
    assert_eq!(last_run_state, Some(RunState::Aborted));
}

#[tokio::test]
async fn test_sequential_runs_one_at_a_time() {
    let (coordinator, recorder) = setup(Recorder::new(5));

    let report = coordinator
        .run(&hosts(&["a", "b", "c"]), Strategy::Sequential, deploy())
        .await
        .unwrap();

    assert_eq!(report.into_values(), vec!["a", "b", "c"]);
    assert_eq!(recorder.peak.load(Ordering::SeqCst), 1);
    assert_eq!(
        recorder.log(),
        vec!["start:a", "end:a", "start:b", "end:b", "start:c", "end:c"]
    );
}

#[tokio::test]
async fn test_parallel_waits_for_all_and_aggregates() {
    let (coordinator, recorder) = setup(Recorder::new(20).failing(&["b"]));

    let err = coordinator
        .run(&hosts(&["a", "b", "c"]), Strategy::Parallel, deploy())
        .await
        .unwrap_err();

    let CoreError::Aggregate(aggregate) = err else {
        panic!("expected aggregate failure, got {err:?}");
    };
    assert_eq!(aggregate.failed_hosts().map(Host::address).collect::<Vec<_>>(), vec!["b"]);
    assert_eq!(names(&aggregate.succeeded), vec!["a", "c"]);
    assert!(aggregate.skipped.is_empty());
    assert_eq!(
        aggregate.error_for(&Host::new("b")).and_then(ExecError::exit_status),
        Some(1)
    );

    // Every host ran, and all at once
    assert_eq!(recorder.started().len(), 3);
    assert_eq!(recorder.peak.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_single_failure_is_still_aggregated() {
    let (coordinator, _recorder) = setup(Recorder::new(1).failing(&["only"]));

    let err = coordinator
        .run(&hosts(&["only"]), Strategy::Parallel, deploy())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Aggregate(ref agg) if agg.failures.len() == 1));
}

#[tokio::test]
async fn test_failures_reported_in_host_order() {
    let (coordinator, _recorder) = setup(Recorder::new(5).failing(&["a", "c", "d"]));

    let err = coordinator
        .run(
            &hosts(&["a", "b", "c", "d"]),
            Strategy::ParallelLimited(2),
            deploy(),
        )
        .await
        .unwrap_err();

    let CoreError::Aggregate(aggregate) = err else {
        panic!("expected aggregate failure, got {err:?}");
    };
    assert_eq!(
        aggregate.failed_hosts().map(Host::address).collect::<Vec<_>>(),
        vec!["a", "c", "d"]
    );
    assert_eq!(names(&aggregate.succeeded), vec!["b"]);
}

#[tokio::test]
async fn test_limited_caps_concurrency() {
    let (coordinator, recorder) = setup(Recorder::new(20));

    let report = coordinator
        .run(
            &hosts(&["a", "b", "c", "d", "e", "f"]),
            Strategy::ParallelLimited(2),
            deploy(),
        )
        .await
        .unwrap();

    assert_eq!(report.len(), 6);
    assert_eq!(report.into_values(), vec!["a", "b", "c", "d", "e", "f"]);
    assert!(recorder.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_grouped_runs_groups_in_order() {
    let (coordinator, recorder) = setup(Recorder::new(10));

    coordinator
        .run(
            &hosts(&["a", "b", "c", "d", "e"]),
            Strategy::Grouped(2),
            deploy(),
        )
        .await
        .unwrap();

    let log = recorder.log();
    let position = |entry: &str| log.iter().position(|e| e == entry).unwrap();

    // Each group finishes before the next one starts
    assert!(position("end:a").max(position("end:b")) < position("start:c"));
    assert!(position("end:c").max(position("end:d")) < position("start:e"));
    assert!(recorder.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_grouped_skips_later_groups_after_failure() {
    let (coordinator, recorder) = setup(Recorder::new(5).failing(&["b"]));
    let mut events = coordinator.subscribe();

    let err = coordinator
        .run(
            &hosts(&["a", "b", "c", "d", "e"]),
            Strategy::Grouped(2),
            deploy(),
        )
        .await
        .unwrap_err();

    let CoreError::Aggregate(aggregate) = err else {
        panic!("expected aggregate failure, got {err:?}");
    };
    assert_eq!(names(&aggregate.succeeded), vec!["a"]);
    assert_eq!(names(&aggregate.skipped), vec!["c", "d", "e"]);
    assert_eq!(recorder.started(), vec!["a", "b"]);

    let mut groups = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let RunEvent::GroupFinished { group, failed, .. } = event {
            groups.push((group, failed));
        }
    }
    assert_eq!(groups, vec![(0, 1)]);
}

#[tokio::test]
async fn test_backend_creation_failure_counts_for_host() {
    let (coordinator, recorder) = setup(Recorder::new(1).unreachable(&["b"]));

    let err = coordinator
        .run(&hosts(&["a", "b", "c"]), Strategy::Parallel, deploy())
        .await
        .unwrap_err();

    let CoreError::Aggregate(aggregate) = err else {
        panic!("expected aggregate failure, got {err:?}");
    };
    assert!(matches!(
        aggregate.error_for(&Host::new("b")),
        Some(ExecError::ConnectionError(_))
    ));
    assert_eq!(recorder.started().len(), 2);
}

#[tokio::test]
async fn test_panicking_worker_fails_its_host() {
    let (coordinator, _recorder) = setup(Recorder::new(1));

    let work = Arc::new(work_fn(|backend| {
        Box::pin(async move {
            assert_ne!(backend.host().address(), "b", "simulated worker crash");
            backend.test("true", &[], CommandOptions::default()).await
        })
    }));

    let err = coordinator
        .run(&hosts(&["a", "b", "c"]), Strategy::Parallel, work)
        .await
        .unwrap_err();

    let CoreError::Aggregate(aggregate) = err else {
        panic!("expected aggregate failure, got {err:?}");
    };
    assert_eq!(names(&aggregate.succeeded), vec!["a", "c"]);
    match aggregate.error_for(&Host::new("b")) {
        Some(ExecError::Unit(message)) => assert!(message.starts_with("worker panicked")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_panicking_worker_aborts_sequential_run() {
    let (coordinator, recorder) = setup(Recorder::new(1));
    let mut events = coordinator.subscribe();

    let work = Arc::new(work_fn(|backend| {
        Box::pin(async move {
            assert_ne!(backend.host().address(), "b", "simulated worker crash");
            backend.test("true", &[], CommandOptions::default()).await
        })
    }));

    let err = coordinator
        .run(&hosts(&["a", "b", "c"]), Strategy::Sequential, work)
        .await
        .unwrap_err();

    match err {
        CoreError::Unit(ExecError::Unit(message)) => {
            assert!(message.starts_with("worker panicked"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(recorder.started(), vec!["a"]);

    let mut failed_units = Vec::new();
    let mut last_run_state = None;
    while let Ok(event) = events.try_recv() {
        match event {
            RunEvent::UnitStateChanged { host, to, .. } if to == UnitState::Failed => {
                failed_units.push(host.address().to_string());
            }
            RunEvent::RunStateChanged { to, .. } => last_run_state = Some(to),
            _ => {}
        }
    }
    assert_eq!(failed_units, vec!["b"]);
    assert_eq!(last_run_state, Some(RunState::Aborted));
}

#[tokio::test]
async fn test_zero_group_size_rejected() {
    let (coordinator, recorder) = setup(Recorder::new(1));

    let err = coordinator
        .run(&hosts(&["a"]), Strategy::Grouped(0), deploy())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::InvalidStrategy(_)));
    assert!(recorder.log().is_empty());
}
