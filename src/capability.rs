//! Capability contract between a handler type and the engine.
//!
//! A handler declares which of its methods act as the check and the optional
//! on-pass / on-fail operations, and under which feature keys it is bound.
//! The declaration is resolved once, at registration, into type-erased
//! operations that close over the owning handler.

use std::{any::type_name, fmt, sync::Arc};

use thiserror::Error;

use crate::value::{Args, OperationResult, Outcome};

pub type FeatureKey = String;

pub type CheckFn<T> = Arc<dyn Fn(&T, &Args) -> OperationResult<bool> + Send + Sync>;
pub type OutcomeFn<T> = Arc<dyn Fn(&T, &Args) -> OperationResult<Outcome> + Send + Sync>;

pub type CheckOp = Arc<dyn Fn(&Args) -> OperationResult<bool> + Send + Sync>;
pub type OutcomeOp = Arc<dyn Fn(&Args) -> OperationResult<Outcome> + Send + Sync>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Handler {handler} declares no check operation")]
    MissingCheck { handler: String },
    #[error("Handler {handler} declares no feature keys")]
    EmptyKeys { handler: String },
    #[error("Handler {handler} declares a blank feature key at position {position}")]
    BlankKey { handler: String, position: usize },
}

/// Implemented by types that can be registered with the engine.
pub trait DarkHandler: Send + Sync + Sized + 'static {
    fn capability(&self) -> Capability<Self>;
}

struct Declared<F> {
    name: String,
    call: F,
}

/// Declaration of a handler's keys and operations.
///
/// ```
/// use darklaunch::{Args, Capability, DarkHandler, OperationResult, Outcome};
///
/// struct Beta;
///
/// impl Beta {
///     fn enabled(&self, args: &Args) -> OperationResult<bool> {
///         Ok(args.get::<i64>(0)? % 2 == 0)
///     }
///     fn serve(&self, _args: &Args) -> OperationResult<Outcome> {
///         Ok(Outcome::single("beta"))
///     }
/// }
///
/// impl DarkHandler for Beta {
///     fn capability(&self) -> Capability<Self> {
///         Capability::new()
///             .key_list("checkout.beta,cart.beta")
///             .check("enabled", Self::enabled)
///             .on_pass("serve", Self::serve)
///     }
/// }
/// ```
pub struct Capability<T> {
    keys: Vec<FeatureKey>,
    check: Option<Declared<CheckFn<T>>>,
    on_pass: Option<Declared<OutcomeFn<T>>>,
    on_fail: Option<Declared<OutcomeFn<T>>>,
}

impl<T> Default for Capability<T> {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            check: None,
            on_pass: None,
            on_fail: None,
        }
    }
}

impl<T: Send + Sync + 'static> Capability<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: impl Into<FeatureKey>) -> Self {
        self.keys.push(key.into());
        self
    }

    pub fn keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<FeatureKey>,
    {
        self.keys.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Adds keys from a comma separated list. Segments are not trimmed.
    pub fn key_list(self, list: &str) -> Self {
        if list.is_empty() {
            return self;
        }
        self.keys(list.split(','))
    }

    pub fn check<F>(mut self, name: &str, check: F) -> Self
    where
        F: Fn(&T, &Args) -> OperationResult<bool> + Send + Sync + 'static,
    {
        self.check = Some(Declared {
            name: name.to_string(),
            call: Arc::new(check),
        });
        self
    }

    pub fn on_pass<F>(mut self, name: &str, on_pass: F) -> Self
    where
        F: Fn(&T, &Args) -> OperationResult<Outcome> + Send + Sync + 'static,
    {
        self.on_pass = Some(Declared {
            name: name.to_string(),
            call: Arc::new(on_pass),
        });
        self
    }

    pub fn on_fail<F>(mut self, name: &str, on_fail: F) -> Self
    where
        F: Fn(&T, &Args) -> OperationResult<Outcome> + Send + Sync + 'static,
    {
        self.on_fail = Some(Declared {
            name: name.to_string(),
            call: Arc::new(on_fail),
        });
        self
    }

    pub fn declared_keys(&self) -> &[FeatureKey] {
        &self.keys
    }

    /// Validates the declared keys without binding any operation.
    pub fn validate_keys(&self) -> Result<(), ConfigurationError> {
        let handler = type_name::<T>().to_string();
        if self.keys.is_empty() {
            return Err(ConfigurationError::EmptyKeys { handler });
        }
        if let Some(position) = self.keys.iter().position(|key| key.is_empty()) {
            return Err(ConfigurationError::BlankKey { handler, position });
        }
        Ok(())
    }

    /// Binds the declared operations to `owner`.
    pub fn resolve(self, owner: Arc<T>) -> Result<ResolvedCapability, ConfigurationError> {
        self.validate_keys()?;
        let handler = type_name::<T>();
        let check = self.check.ok_or_else(|| ConfigurationError::MissingCheck {
            handler: handler.to_string(),
        })?;

        let check = {
            let owner = owner.clone();
            let call = check.call;
            Operation {
                signature: signature(handler, &check.name, "bool"),
                call: Arc::new(move |args: &Args| call(owner.as_ref(), args)) as CheckOp,
            }
        };
        let bind_outcome = |declared: Declared<OutcomeFn<T>>| {
            let owner = owner.clone();
            let call = declared.call;
            Operation {
                signature: signature(handler, &declared.name, "Outcome"),
                call: Arc::new(move |args: &Args| call(owner.as_ref(), args)) as OutcomeOp,
            }
        };
        let on_pass = self.on_pass.map(&bind_outcome);
        let on_fail = self.on_fail.map(&bind_outcome);

        Ok(ResolvedCapability {
            handler: handler.to_string(),
            keys: self.keys,
            check,
            on_pass,
            on_fail,
        })
    }
}

fn signature(handler: &str, name: &str, returns: &str) -> String {
    format!("{}::{}(&self, &Args) -> {}", handler, name, returns)
}

/// A declared operation bound to its owner.
#[derive(Clone)]
pub struct Operation<F> {
    signature: String,
    pub(crate) call: F,
}

impl<F> Operation<F> {
    pub fn signature(&self) -> &str {
        &self.signature
    }
}

impl<F> fmt::Debug for Operation<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("signature", &self.signature)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedCapability {
    pub handler: String,
    pub keys: Vec<FeatureKey>,
    pub check: Operation<CheckOp>,
    pub on_pass: Option<Operation<OutcomeOp>>,
    pub on_fail: Option<Operation<OutcomeOp>>,
}
