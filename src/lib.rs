//! In-process gray-release evaluator.
//!
//! Handlers are registered under feature keys and evaluated with positional
//! arguments; see [`DarkLaunch`].

pub mod admission;
pub mod capability;
pub mod config;
pub mod engine;
pub mod error;
pub mod fault;
pub mod handler_registry;
pub mod value;

// Re-exports
pub use admission::{Admission, AdmissionError, AdmissionGate};
pub use capability::{Capability, ConfigurationError, DarkHandler, FeatureKey};
pub use config::DarkLaunchConfig;
pub use engine::{
    BackgroundReport, BackgroundTask, DarkLaunch, Evaluation, FeatureCheck, FeatureControl,
    OutcomeState, Verdict,
};
pub use error::*;
pub use fault::{Fault, FaultKind, FaultSink, FaultStage, SilentFaultSink, TracingFaultSink};
pub use handler_registry::{ExecutionMode, HandlerRecord, HandlerRegistry};
pub use value::{Args, FromValue, OperationError, OperationResult, Outcome, Value};
