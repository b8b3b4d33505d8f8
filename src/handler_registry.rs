use std::{collections::HashMap, fmt::Write, sync::Arc};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::capability::{
    CheckOp, ConfigurationError, DarkHandler, FeatureKey, Operation, OutcomeOp,
    ResolvedCapability,
};

/// How a handler's check and outcome operations are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionMode {
    /// Check and outcome run on a background task.
    pub async_check: bool,
    /// Outcome runs on a background task after an inline check.
    /// Ignored when `async_check` is set.
    pub async_exec: bool,
    /// Overlapping background evaluations of one record are serialised.
    pub transactional: bool,
}

impl ExecutionMode {
    pub fn inline() -> Self {
        Self::default()
    }

    pub fn async_exec() -> Self {
        Self {
            async_exec: true,
            ..Self::default()
        }
    }

    pub fn async_check(transactional: bool) -> Self {
        Self {
            async_check: true,
            async_exec: false,
            transactional,
        }
    }
}

/// One registered behavior, bound to a single feature key.
pub struct HandlerRecord {
    key: FeatureKey,
    handler: String,
    pub(crate) check: Operation<CheckOp>,
    pub(crate) on_pass: Option<Operation<OutcomeOp>>,
    pub(crate) on_fail: Option<Operation<OutcomeOp>>,
    mode: ExecutionMode,
    lock: Arc<Mutex<()>>,
}

impl HandlerRecord {
    fn new(key: FeatureKey, capability: &ResolvedCapability, mode: ExecutionMode) -> Self {
        Self {
            key,
            handler: capability.handler.clone(),
            check: capability.check.clone(),
            on_pass: capability.on_pass.clone(),
            on_fail: capability.on_fail.clone(),
            mode,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn handler(&self) -> &str {
        &self.handler
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn check_signature(&self) -> &str {
        self.check.signature()
    }

    pub(crate) fn outcome_for(&self, passed: bool) -> Option<&Operation<OutcomeOp>> {
        if passed {
            self.on_pass.as_ref()
        } else {
            self.on_fail.as_ref()
        }
    }

    /// The exclusive lock serialising transactional evaluations of this record.
    pub(crate) fn lock(&self) -> Arc<Mutex<()>> {
        self.lock.clone()
    }
}

impl std::fmt::Debug for HandlerRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRecord")
            .field("key", &self.key)
            .field("handler", &self.handler)
            .field("check", &self.check)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Concurrent key to handler map.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<DashMap<FeatureKey, Arc<HandlerRecord>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `owner`'s capability and binds one record per declared key,
    /// replacing whatever was bound under that key before.
    pub fn register<H: DarkHandler>(
        &self,
        owner: Arc<H>,
        mode: ExecutionMode,
    ) -> Result<Vec<FeatureKey>, ConfigurationError> {
        let capability = owner.capability().resolve(owner.clone())?;
        for key in capability.keys.iter() {
            let record = Arc::new(HandlerRecord::new(key.clone(), &capability, mode));
            if self.handlers.insert(key.clone(), record).is_some() {
                debug!(key = %key, handler = %capability.handler, "handler replaced");
            } else {
                debug!(key = %key, handler = %capability.handler, "handler registered");
            }
        }
        Ok(capability.keys)
    }

    /// Unbinds every key `owner` declares. Unknown keys are ignored.
    /// Returns how many records were removed.
    pub fn remove<H: DarkHandler>(&self, owner: &H) -> Result<usize, ConfigurationError> {
        let capability = owner.capability();
        capability.validate_keys()?;
        let removed = capability
            .declared_keys()
            .iter()
            .filter(|key| self.handlers.remove(key.as_str()).is_some())
            .count();
        debug!(removed, "handlers removed");
        Ok(removed)
    }

    pub fn lookup(&self, key: &str) -> Option<Arc<HandlerRecord>> {
        self.handlers.get(key).map(|record| record.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn keys(&self) -> Vec<FeatureKey> {
        self.handlers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Snapshot of key to check signature. The snapshot is also written to the
    /// `darklaunch::preview` log target.
    pub fn preview(&self) -> HashMap<String, String> {
        let preview: HashMap<String, String> = self
            .handlers
            .iter()
            .map(|entry| (entry.key().clone(), entry.check_signature().to_string()))
            .collect();

        let mut keys: Vec<&String> = preview.keys().collect();
        keys.sort();
        let mut report = String::new();
        for key in keys {
            let _ = write!(
                report,
                "\n-------------------------\n{}:\n{}\n",
                key, preview[key]
            );
        }
        info!(target: "darklaunch::preview", "{}", report);

        preview
    }
}
