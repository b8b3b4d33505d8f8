//! Evaluation engine.
//!
//! `evaluate` looks up the handler bound to a key and runs its check and
//! matching outcome operation according to the handler's [`ExecutionMode`]:
//!
//! | mode | check | outcome | caller receives |
//! |---|---|---|---|
//! | inline | caller | caller | check result and outcome slots |
//! | async exec | caller | background | check result, empty slots |
//! | async check | background | background | always `passed = true`, empty slots |
//!
//! Background work is admitted through the [`AdmissionGate`]; the caller
//! waits for a credit before the task is started. For transactional
//! handlers the caller additionally waits for the record's exclusive lock,
//! which the background task holds until its outcome has run.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, debug_span, error, warn};
use uuid::Uuid;

use crate::{
    admission::AdmissionGate,
    capability::DarkHandler,
    config::DarkLaunchConfig,
    fault::{FaultIsolation, FaultSink, FaultStage, SilentFaultSink, TracingFaultSink},
    handler_registry::{ExecutionMode, HandlerRecord, HandlerRegistry},
    value::{Args, Outcome, Value},
    DarkResult,
};

/// What the check step concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Verdict {
    Passed,
    Failed,
    /// The check raised a fault and counts as failed.
    Faulted,
    /// No handler is bound to the key.
    Unregistered,
    /// The check runs in the background; its result is not known yet.
    Deferred,
    /// The admission gate is closed.
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum OutcomeState {
    Returned,
    /// No outcome operation is declared for the check result.
    Missing,
    Faulted,
    /// The outcome runs in the background.
    Detached,
    Skipped,
}

/// Result of one `evaluate` call.
///
/// `passed`, `outcome.first` and `outcome.second` form the classic
/// `(passed, result1, result2)` triple; `verdict` and `outcome_state` tell
/// the neutral cases apart.
#[derive(Debug)]
pub struct Evaluation {
    pub passed: bool,
    pub outcome: Outcome,
    pub verdict: Verdict,
    pub outcome_state: OutcomeState,
    task: Option<BackgroundTask>,
}

impl Evaluation {
    fn settled(passed: bool, verdict: Verdict, outcome: Outcome, state: OutcomeState) -> Self {
        Self {
            passed,
            outcome,
            verdict,
            outcome_state: state,
            task: None,
        }
    }

    fn unregistered() -> Self {
        Self::settled(
            false,
            Verdict::Unregistered,
            Outcome::empty(),
            OutcomeState::Skipped,
        )
    }

    pub fn into_tuple(self) -> (bool, Option<Value>, Option<Value>) {
        let (first, second) = self.outcome.into_parts();
        (self.passed, first, second)
    }

    pub fn is_background(&self) -> bool {
        self.task.is_some()
    }

    /// Takes the handle of the background task, if one was started.
    /// Dropping it leaves the task running detached.
    pub fn take_background(&mut self) -> Option<BackgroundTask> {
        self.task.take()
    }

    /// Waits for the background task, if any, and returns its report.
    pub async fn settle(self) -> Option<BackgroundReport> {
        match self.task {
            Some(task) => task.join().await,
            None => None,
        }
    }
}

/// What a background evaluation actually computed.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundReport {
    pub key: String,
    pub passed: bool,
    pub verdict: Verdict,
    pub outcome: Outcome,
    pub outcome_state: OutcomeState,
}

#[derive(Debug)]
pub struct BackgroundTask {
    id: Uuid,
    handle: JoinHandle<BackgroundReport>,
}

impl BackgroundTask {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) -> Option<BackgroundReport> {
        match self.handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(id = %self.id, "background evaluation did not complete: {}", e);
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CheckResult {
    passed: bool,
    verdict: Verdict,
}

/// Dispatch entry point of the feature checks.
#[async_trait]
pub trait FeatureCheck: Send + Sync {
    async fn evaluate(&self, key: &str, args: Args) -> Evaluation;
}

/// Operational controls and diagnostics.
pub trait FeatureControl: Send + Sync {
    fn has(&self, key: &str) -> bool;
    fn set_admission_capacity(&self, capacity: usize) -> DarkResult<()>;
    fn preview(&self) -> HashMap<String, String>;
}

/// The gray-release engine: a handler registry, an admission gate and the
/// fault sink shared by every evaluation. Clones share all three.
#[derive(Clone)]
pub struct DarkLaunch {
    registry: HandlerRegistry,
    gate: AdmissionGate,
    isolation: FaultIsolation,
}

impl Default for DarkLaunch {
    fn default() -> Self {
        Self::new()
    }
}

impl DarkLaunch {
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            gate: AdmissionGate::default(),
            isolation: FaultIsolation::new(Arc::new(TracingFaultSink)),
        }
    }

    pub fn with_config(config: &DarkLaunchConfig) -> DarkResult<Self> {
        let sink: Arc<dyn FaultSink> = if config.log_faults {
            Arc::new(TracingFaultSink)
        } else {
            Arc::new(SilentFaultSink)
        };
        Ok(Self {
            registry: HandlerRegistry::new(),
            gate: AdmissionGate::new(config.admission_capacity)?,
            isolation: FaultIsolation::new(sink),
        })
    }

    pub fn with_fault_sink(mut self, sink: Arc<dyn FaultSink>) -> Self {
        self.isolation = FaultIsolation::new(sink);
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn admission(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Binds a handler whose check runs on the caller. With `async_exec` the
    /// outcome operation runs in the background.
    pub fn register<H: DarkHandler>(&self, owner: Arc<H>, async_exec: bool) -> DarkResult<()> {
        let mode = if async_exec {
            ExecutionMode::async_exec()
        } else {
            ExecutionMode::inline()
        };
        self.registry.register(owner, mode)?;
        Ok(())
    }

    /// Binds a handler whose check and outcome both run in the background.
    pub fn register_async<H: DarkHandler>(
        &self,
        owner: Arc<H>,
        transactional: bool,
    ) -> DarkResult<()> {
        self.registry
            .register(owner, ExecutionMode::async_check(transactional))?;
        Ok(())
    }

    /// Unbinds every key `owner` declares. Evaluations that already hold the
    /// record run to completion.
    pub fn remove<H: DarkHandler>(&self, owner: &H) -> DarkResult<()> {
        self.registry.remove(owner)?;
        Ok(())
    }

    pub fn has(&self, key: &str) -> bool {
        self.registry.contains(key)
    }

    pub fn set_admission_capacity(&self, capacity: usize) -> DarkResult<()> {
        self.gate.resize(capacity)?;
        Ok(())
    }

    pub fn preview(&self) -> HashMap<String, String> {
        self.registry.preview()
    }

    /// Stops admitting background evaluations. Admitted ones run to completion.
    pub fn shutdown(&self) {
        debug!(in_flight = self.gate.in_flight(), "closing admission gate");
        self.gate.close();
    }

    pub async fn evaluate(&self, key: &str, args: impl Into<Args>) -> Evaluation {
        let args = args.into();
        let Some(record) = self.registry.lookup(key) else {
            debug!(key, "no handler registered");
            return Evaluation::unregistered();
        };

        let mode = record.mode();
        debug!(key, ?mode, "evaluating");
        if mode.async_check {
            self.evaluate_deferred(record, args).await
        } else {
            self.evaluate_inline(record, args).await
        }
    }

    async fn evaluate_inline(&self, record: Arc<HandlerRecord>, args: Args) -> Evaluation {
        let check = run_check(&self.isolation, &record, &args);

        if !record.mode().async_exec {
            let (outcome, state) = run_outcome(&self.isolation, &record, check.passed, &args);
            return Evaluation::settled(check.passed, check.verdict, outcome, state);
        }

        let admission = match self.gate.acquire().await {
            Ok(admission) => admission,
            Err(e) => {
                warn!(key = record.key(), "outcome not admitted: {}", e);
                return Evaluation::settled(
                    check.passed,
                    check.verdict,
                    Outcome::empty(),
                    OutcomeState::Skipped,
                );
            }
        };

        let isolation = self.isolation.clone();
        let key = record.key().to_string();
        let task = spawn_background(key.clone(), move || {
            let (outcome, outcome_state) = run_outcome(&isolation, &record, check.passed, &args);
            admission.release();
            BackgroundReport {
                key,
                passed: check.passed,
                verdict: check.verdict,
                outcome,
                outcome_state,
            }
        });

        Evaluation {
            passed: check.passed,
            outcome: Outcome::empty(),
            verdict: check.verdict,
            outcome_state: OutcomeState::Detached,
            task: Some(task),
        }
    }

    async fn evaluate_deferred(&self, record: Arc<HandlerRecord>, args: Args) -> Evaluation {
        let exclusive = if record.mode().transactional {
            Some(record.lock().lock_owned().await)
        } else {
            None
        };

        let admission = match self.gate.acquire().await {
            Ok(admission) => admission,
            Err(e) => {
                warn!(key = record.key(), "evaluation not admitted: {}", e);
                drop(exclusive);
                return Evaluation::settled(
                    false,
                    Verdict::Rejected,
                    Outcome::empty(),
                    OutcomeState::Skipped,
                );
            }
        };

        let isolation = self.isolation.clone();
        let key = record.key().to_string();
        let task = spawn_background(key.clone(), move || {
            let check = run_check(&isolation, &record, &args);
            let (outcome, outcome_state) = run_outcome(&isolation, &record, check.passed, &args);
            drop(exclusive);
            admission.release();
            BackgroundReport {
                key,
                passed: check.passed,
                verdict: check.verdict,
                outcome,
                outcome_state,
            }
        });

        // The real check result is only available through the background task.
        Evaluation {
            passed: true,
            outcome: Outcome::empty(),
            verdict: Verdict::Deferred,
            outcome_state: OutcomeState::Detached,
            task: Some(task),
        }
    }
}

#[async_trait]
impl FeatureCheck for DarkLaunch {
    async fn evaluate(&self, key: &str, args: Args) -> Evaluation {
        DarkLaunch::evaluate(self, key, args).await
    }
}

impl FeatureControl for DarkLaunch {
    fn has(&self, key: &str) -> bool {
        DarkLaunch::has(self, key)
    }

    fn set_admission_capacity(&self, capacity: usize) -> DarkResult<()> {
        DarkLaunch::set_admission_capacity(self, capacity)
    }

    fn preview(&self) -> HashMap<String, String> {
        DarkLaunch::preview(self)
    }
}

fn spawn_background<F>(key: String, work: F) -> BackgroundTask
where
    F: FnOnce() -> BackgroundReport + Send + 'static,
{
    let id = Uuid::new_v4();
    let span = debug_span!("background_evaluation", %id, %key);
    let handle = tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        work()
    });
    BackgroundTask { id, handle }
}

fn run_check(isolation: &FaultIsolation, record: &HandlerRecord, args: &Args) -> CheckResult {
    let check = &record.check;
    match isolation.run(record.key(), FaultStage::Check, check.signature(), || {
        (check.call)(args)
    }) {
        Some(true) => CheckResult {
            passed: true,
            verdict: Verdict::Passed,
        },
        Some(false) => CheckResult {
            passed: false,
            verdict: Verdict::Failed,
        },
        None => CheckResult {
            passed: false,
            verdict: Verdict::Faulted,
        },
    }
}

fn run_outcome(
    isolation: &FaultIsolation,
    record: &HandlerRecord,
    passed: bool,
    args: &Args,
) -> (Outcome, OutcomeState) {
    let Some(operation) = record.outcome_for(passed) else {
        return (Outcome::empty(), OutcomeState::Missing);
    };
    let stage = if passed {
        FaultStage::OnPass
    } else {
        FaultStage::OnFail
    };
    match isolation.run(record.key(), stage, operation.signature(), || {
        (operation.call)(args)
    }) {
        Some(outcome) => (outcome, OutcomeState::Returned),
        None => (Outcome::empty(), OutcomeState::Faulted),
    }
}
