use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use darklaunch::{
    args, fault::MockFaultSink, Args, Capability, DarkHandler, DarkLaunch, FaultStage,
    OperationError, OperationResult, Outcome, OutcomeState, Value, Verdict,
};
use pretty_assertions::assert_eq;

use super::{setup_engine, wait_until, Blocking, Latch};

/// Answers with a fixed check result.
struct Scripted {
    keys: &'static str,
    passes: bool,
    on_pass_runs: AtomicUsize,
    on_fail_runs: AtomicUsize,
}

impl Scripted {
    fn new(keys: &'static str, passes: bool) -> Arc<Self> {
        Arc::new(Self {
            keys,
            passes,
            on_pass_runs: AtomicUsize::new(0),
            on_fail_runs: AtomicUsize::new(0),
        })
    }

    fn check(&self, _args: &Args) -> OperationResult<bool> {
        Ok(self.passes)
    }

    fn on_pass(&self, _args: &Args) -> OperationResult<Outcome> {
        self.on_pass_runs.fetch_add(1, Ordering::SeqCst);
        Ok(Outcome::pair(7, 9))
    }

    fn on_fail(&self, _args: &Args) -> OperationResult<Outcome> {
        self.on_fail_runs.fetch_add(1, Ordering::SeqCst);
        Ok(Outcome::single("fallback"))
    }
}

impl DarkHandler for Scripted {
    fn capability(&self) -> Capability<Self> {
        Capability::new()
            .key_list(self.keys)
            .check("check", Self::check)
            .on_pass("on_pass", Self::on_pass)
            .on_fail("on_fail", Self::on_fail)
    }
}

struct Broken;

impl Broken {
    fn check(&self, args: &Args) -> OperationResult<bool> {
        let user: i64 = args.get(0)?;
        if user < 0 {
            return Err(OperationError::failed("negative user id"));
        }
        Ok(true)
    }
}

impl DarkHandler for Broken {
    fn capability(&self) -> Capability<Self> {
        Capability::new().key("broken").check("check", Self::check)
    }
}

#[tokio::test]
async fn test_sync_path_returns_outcome_slots() {
    let engine = setup_engine("{}");
    let handler = Scripted::new("beta", true);
    engine.register(handler.clone(), false).unwrap();

    let result = engine.evaluate("beta", args![1]).await.into_tuple();
    assert_eq!(
        result,
        (true, Some(Value::Integer(7)), Some(Value::Integer(9)))
    );
    assert_eq!(handler.on_pass_runs.load(Ordering::SeqCst), 1);
    assert_eq!(handler.on_fail_runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_sync_path_failing_check() {
    let engine = setup_engine("{}");
    let handler = Scripted::new("beta", false);
    engine.register(handler.clone(), false).unwrap();

    let result = engine.evaluate("beta", args![1]).await.into_tuple();
    assert_eq!(
        result,
        (false, Some(Value::String("fallback".to_string())), None)
    );
    assert_eq!(handler.on_fail_runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unregistered_key_is_neutral() {
    let engine = setup_engine("{}");
    let evaluation = engine.evaluate("nobody", args![1]).await;
    assert_eq!(evaluation.verdict, Verdict::Unregistered);
    assert_eq!(evaluation.into_tuple(), (false, None, None));
}

#[tokio::test]
async fn test_async_exec_outcome_runs_in_background() {
    let engine = setup_engine("{}");
    let handler = Scripted::new("beta", true);
    engine.register(handler.clone(), true).unwrap();

    let evaluation = engine.evaluate("beta", args![1]).await;
    assert!(evaluation.passed);
    assert_eq!(evaluation.outcome_state, OutcomeState::Detached);

    let report = evaluation.settle().await.unwrap();
    assert_eq!(report.outcome, Outcome::pair(7, 9));
    assert_eq!(report.outcome_state, OutcomeState::Returned);
    assert_eq!(handler.on_pass_runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_detached_outcome_still_runs() {
    let engine = setup_engine("{}");
    let handler = Scripted::new("beta", false);
    engine.register(handler.clone(), true).unwrap();

    let mut evaluation = engine.evaluate("beta", args![1]).await;
    let task = evaluation.take_background();
    assert!(task.is_some());
    assert_eq!(evaluation.into_tuple(), (false, None, None));
    drop(task);

    wait_until("detached on_fail", || {
        handler.on_fail_runs.load(Ordering::SeqCst) == 1
    })
    .await;
}

#[tokio::test]
async fn test_async_check_always_reports_passed() {
    let engine = setup_engine("{}");
    let handler = Scripted::new("beta", false);
    engine.register_async(handler.clone(), false).unwrap();

    let evaluation = engine.evaluate("beta", args![1]).await;
    assert_eq!(evaluation.verdict, Verdict::Deferred);
    assert!(evaluation.passed);
    assert!(evaluation.outcome.is_empty());

    let report = evaluation.settle().await.unwrap();
    assert!(!report.passed);
    assert_eq!(report.verdict, Verdict::Failed);
    assert_eq!(handler.on_fail_runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fault_is_reported_to_sink() {
    let mut sink = MockFaultSink::new();
    sink.expect_record()
        .withf(|fault| fault.key == "broken" && fault.stage == FaultStage::Check)
        .times(1)
        .return_const(());
    let engine = DarkLaunch::new().with_fault_sink(Arc::new(sink));
    engine.register(Arc::new(Broken), false).unwrap();

    let evaluation = engine.evaluate("broken", args![-1]).await;
    assert_eq!(evaluation.verdict, Verdict::Faulted);
    assert_eq!(evaluation.outcome_state, OutcomeState::Missing);
    assert_eq!(evaluation.into_tuple(), (false, None, None));
}

#[tokio::test]
async fn test_missing_argument_binds_zero_value() {
    let engine = setup_engine(r#"{ "log_faults": false }"#);
    engine.register(Arc::new(Broken), false).unwrap();

    // no arguments: user id binds to 0 and the check passes
    let evaluation = engine.evaluate("broken", Args::none()).await;
    assert_eq!(evaluation.verdict, Verdict::Passed);
    let evaluation = engine.evaluate("broken", args![Value::Null]).await;
    assert_eq!(evaluation.verdict, Verdict::Passed);
    let evaluation = engine.evaluate("broken", args![true]).await;
    assert_eq!(evaluation.verdict, Verdict::Faulted);
}

#[tokio::test]
async fn test_reregistration_replaces_handler() {
    let engine = setup_engine("{}");
    engine.register(Scripted::new("beta", true), false).unwrap();
    engine.register(Scripted::new("beta", false), false).unwrap();

    let evaluation = engine.evaluate("beta", args![1]).await;
    assert_eq!(evaluation.verdict, Verdict::Failed);
}

#[tokio::test]
async fn test_remove_unbinds_every_key() {
    let engine = setup_engine("{}");
    let handler = Scripted::new("a,b,c", true);
    engine.register(handler.clone(), false).unwrap();
    assert!(engine.has("a") && engine.has("b") && engine.has("c"));

    engine.remove(handler.as_ref()).unwrap();
    for key in ["a", "b", "c"] {
        assert!(!engine.has(key));
        let evaluation = engine.evaluate(key, args![1]).await;
        assert_eq!(evaluation.verdict, Verdict::Unregistered);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_in_flight_evaluation_survives_removal() {
    let engine = setup_engine("{}");
    let latch = Latch::closed();
    let handler = Blocking::new("slow", latch.clone(), Duration::ZERO);
    engine.register_async(handler.clone(), false).unwrap();

    let evaluation = engine.evaluate("slow", args![5]).await;
    wait_until("check to start", || handler.overlap.current() == 1).await;

    engine.remove(handler.as_ref()).unwrap();
    assert!(!engine.has("slow"));
    latch.open();

    let report = evaluation.settle().await.unwrap();
    assert!(report.passed);
    assert_eq!(report.outcome, Outcome::single(5));
}

#[tokio::test]
async fn test_preview_lists_every_key() {
    let engine = setup_engine("{}");
    engine.register(Scripted::new("a,b", true), false).unwrap();
    engine.register(Arc::new(Broken), false).unwrap();

    let preview = engine.preview();
    assert_eq!(preview.len(), 3);
    assert!(preview["a"].contains("Scripted::check"));
    assert_eq!(preview["a"], preview["b"]);
    assert!(preview["broken"].contains("Broken::check"));
}

#[tokio::test]
async fn test_registration_errors() {
    struct NoKeys;
    impl DarkHandler for NoKeys {
        fn capability(&self) -> Capability<Self> {
            Capability::new().check("check", |_: &NoKeys, _: &Args| Ok(true))
        }
    }

    let engine = setup_engine("{}");
    assert!(engine.register(Arc::new(NoKeys), false).is_err());
    assert!(engine.registry().is_empty());
}
