use std::{
    any::Any,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::value::OperationResult;

/// Which operation of a handler raised the fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum FaultStage {
    Check,
    OnPass,
    OnFail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultKind {
    Panicked(String),
    Errored(String),
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FaultKind::Panicked(message) => write!(f, "panicked: {}", message),
            FaultKind::Errored(message) => write!(f, "errored: {}", message),
        }
    }
}

/// A runtime fault absorbed while invoking a handler operation.
#[derive(Debug, Clone)]
pub struct Fault {
    pub key: String,
    pub stage: FaultStage,
    pub operation: String,
    pub kind: FaultKind,
    pub occurred_at: DateTime<Utc>,
}

/// Receives every absorbed fault. Recording must not fail or block for long;
/// it runs on the evaluating thread.
#[mockall::automock]
pub trait FaultSink: Send + Sync {
    fn record(&self, fault: &Fault);
}

/// Logs faults at WARN level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFaultSink;

impl FaultSink for TracingFaultSink {
    fn record(&self, fault: &Fault) {
        warn!(
            key = %fault.key,
            stage = %fault.stage,
            operation = %fault.operation,
            "handler operation {}",
            fault.kind
        );
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SilentFaultSink;

impl FaultSink for SilentFaultSink {
    fn record(&self, _fault: &Fault) {}
}

/// Runs handler operations so that neither a returned error nor a panic
/// escapes to the evaluating caller.
#[derive(Clone)]
pub(crate) struct FaultIsolation {
    sink: Arc<dyn FaultSink>,
}

impl FaultIsolation {
    pub(crate) fn new(sink: Arc<dyn FaultSink>) -> Self {
        Self { sink }
    }

    pub(crate) fn run<T, F>(
        &self,
        key: &str,
        stage: FaultStage,
        operation: &str,
        call: F,
    ) -> Option<T>
    where
        F: FnOnce() -> OperationResult<T>,
    {
        let kind = match catch_unwind(AssertUnwindSafe(call)) {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(e)) => FaultKind::Errored(e.to_string()),
            Err(payload) => FaultKind::Panicked(panic_message(payload.as_ref())),
        };

        self.sink.record(&Fault {
            key: key.to_string(),
            stage,
            operation: operation.to_string(),
            kind,
            occurred_at: Utc::now(),
        });
        None
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
