use super::*;
use std::sync::atomic::AtomicBool;

fn runner(config: RunnerConfig) -> Arc<SandboxRunner> {
    Arc::new(SandboxRunner::new(
        Arc::new(CompilePipeline::default()),
        config,
    ))
}

fn with_deadline(ms: u64) -> RunnerConfig {
    RunnerConfig {
        deadline: Duration::from_millis(ms),
        ..RunnerConfig::default()
    }
}

fn messages(report: &RunReport) -> Vec<&str> {
    report.logs.iter().map(|e| e.message.as_str()).collect()
}

async fn wait_executing(runner: &SandboxRunner, run_id: u64) {
    let mut status = runner.subscribe();
    status
        .wait_for(|s| s.run_id == run_id && s.state == RunState::Executing)
        .await
        .unwrap();
}

#[test]
fn test_terminal_states() {
    assert!(!RunState::Idle.is_terminal());
    assert!(!RunState::Compiling.is_terminal());
    assert!(!RunState::Executing.is_terminal());
    assert!(RunState::Completed.is_terminal());
    assert!(RunState::Failed.is_terminal());
    assert!(RunState::TimedOut.is_terminal());
    assert!(RunState::Cancelled.is_terminal());
}

#[tokio::test]
async fn test_run_completes_with_logs_in_order() {
    let runner = runner(RunnerConfig::default());
    assert_eq!(runner.status().state, RunState::Idle);

    let report = runner
        .run("console.log('a');\nconsole.info('b', 1 + 1);\nreturn 1 + 1;")
        .await;
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(messages(&report), vec!["a", "b 2"]);
    assert_eq!(report.logs[1].level, LogLevel::Info);
    assert_eq!(report.value.as_deref(), Some("2"));
    assert!(report.started_executing.is_some());
    assert_eq!(
        runner.status(),
        RunStatus {
            run_id: 1,
            state: RunState::Completed
        }
    );
    assert_eq!(runner.live_contexts(), 0);
}

#[tokio::test]
async fn test_compile_failure_never_executes() {
    let runner = runner(RunnerConfig::default());
    let report = runner.run("let = ;").await;
    assert!(matches!(
        report.outcome,
        RunOutcome::Failed(RunFailure::Compile(CompileFailure::CompilerError(_)))
    ));
    assert!(report.started_executing.is_none());
    assert!(report.logs.is_empty());
    assert_eq!(runner.status().state, RunState::Failed);
}

#[tokio::test]
async fn test_runtime_fault_keeps_earlier_logs() {
    let runner = runner(RunnerConfig::default());
    let report = runner.run("console.log('x'); missing();").await;
    assert_eq!(
        report.outcome,
        RunOutcome::Failed(RunFailure::RuntimeFault(
            "ReferenceError: missing is not defined".to_string()
        ))
    );
    assert_eq!(messages(&report), vec!["x"]);
}

#[tokio::test]
async fn test_output_limit_is_a_runtime_fault() {
    let runner = runner(RunnerConfig {
        max_output_bytes: 64,
        ..RunnerConfig::default()
    });
    let report = runner.run("for (;;) { console.log('spam'); }").await;
    assert_eq!(
        report.outcome,
        RunOutcome::Failed(RunFailure::RuntimeFault(
            "output limit exceeded".to_string()
        ))
    );
}

#[tokio::test]
async fn test_endless_script_times_out_near_the_deadline() {
    let runner = runner(with_deadline(200));
    let report = runner.run("console.log('start'); while (true) {}").await;
    assert_eq!(report.outcome, RunOutcome::TimedOut);
    assert_eq!(messages(&report), vec!["start"]);

    let started = report.started_executing.unwrap();
    let elapsed = report.finished.duration_since(started);
    assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(2200), "{elapsed:?}");
    assert_eq!(runner.status().state, RunState::TimedOut);
    assert_eq!(runner.live_contexts(), 0);
}

#[tokio::test]
async fn test_cancel_executing_run() {
    let runner = runner(with_deadline(10_000));
    assert!(!runner.cancel());

    let task = tokio::spawn({
        let runner = runner.clone();
        async move { runner.run("while (true) {}").await }
    });
    wait_executing(&runner, 1).await;
    assert!(runner.cancel());
    assert!(runner.cancel());

    let report = task.await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(runner.status().state, RunState::Cancelled);
    assert!(!runner.cancel());
    assert_eq!(runner.live_contexts(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_new_run_supersedes_executing_run() {
    let runner = runner(with_deadline(10_000));

    let stop = Arc::new(AtomicBool::new(false));
    let monitor = tokio::spawn({
        let runner = runner.clone();
        let stop = stop.clone();
        async move {
            let mut max_live = 0;
            while !stop.load(Ordering::SeqCst) {
                max_live = max_live.max(runner.live_contexts());
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            max_live
        }
    });

    let first = tokio::spawn({
        let runner = runner.clone();
        async move { runner.run("console.log('first'); while (true) {}").await }
    });
    wait_executing(&runner, 1).await;

    let second = runner.run("console.log('second')").await;
    let first = first.await.unwrap();
    stop.store(true, Ordering::SeqCst);

    assert_eq!(first.outcome, RunOutcome::Cancelled);
    assert_eq!(second.outcome, RunOutcome::Completed);
    assert_eq!(messages(&second), vec!["second"]);
    assert!(first.finished <= second.started_executing.unwrap());
    assert!(monitor.await.unwrap() <= 1);
    assert_eq!(runner.live_contexts(), 0);
}

#[tokio::test]
async fn test_sink_receives_events_as_they_arrive() {
    let runner = runner(RunnerConfig::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let report = runner
        .run_with_sink("for (let i = 0; i < 3; i++) { console.warn(i); }", Some(tx))
        .await;

    let mut streamed = Vec::new();
    while let Ok(event) = rx.try_recv() {
        streamed.push(event);
    }
    assert_eq!(streamed, report.logs);
    assert_eq!(messages(&report), vec!["0", "1", "2"]);
}

#[tokio::test]
async fn test_run_ids_increase() {
    let runner = runner(RunnerConfig::default());
    let a = runner.run("1;").await;
    let b = runner.run("2;").await;
    assert_eq!((a.run_id, b.run_id), (1, 2));
    assert_eq!(runner.compiler().load_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_that_fails_to_compile_still_supersedes() {
    let runner = runner(with_deadline(10_000));
    let first = tokio::spawn({
        let runner = runner.clone();
        async move { runner.run("while (true) {}").await }
    });
    wait_executing(&runner, 1).await;

    let second = runner.run("let = ;").await;
    assert!(matches!(
        second.outcome,
        RunOutcome::Failed(RunFailure::Compile(_))
    ));
    assert_eq!(runner.live_contexts(), 0);
    assert_eq!(
        runner.status(),
        RunStatus {
            run_id: 2,
            state: RunState::Failed
        }
    );

    let first = first.await.unwrap();
    assert_eq!(first.outcome, RunOutcome::Cancelled);
    assert!(first.finished <= second.finished);
    assert!(!runner.cancel());
}

#[tokio::test]
async fn test_runaway_string_is_a_range_error() {
    let runner = runner(RunnerConfig::default());
    let started = Instant::now();
    let report = runner
        .run("let s = 'ab';\nfor (let i = 0; i < 40; i++) { s = s + s; }\nconsole.log(s.length);")
        .await;
    assert_eq!(
        report.outcome,
        RunOutcome::Failed(RunFailure::RuntimeFault(
            "RangeError: Invalid string length".to_string()
        ))
    );
    assert!(report.logs.is_empty());
    assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
    assert_eq!(runner.live_contexts(), 0);
}

#[tokio::test]
async fn test_deadline_holds_while_building_large_strings() {
    let runner = runner(with_deadline(300));
    let report = runner
        .run("while (true) {\n  let s = 'x';\n  for (let i = 0; i < 24; i++) { s = s + s; }\n}")
        .await;
    assert_eq!(report.outcome, RunOutcome::TimedOut);
    let elapsed = report
        .finished
        .duration_since(report.started_executing.unwrap());
    assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1300), "{elapsed:?}");

    // whatever the context was doing, the next run starts only after it exits
    let next = runner.run("console.log('next');").await;
    assert_eq!(next.outcome, RunOutcome::Completed);
    assert_eq!(runner.live_contexts(), 0);
}
