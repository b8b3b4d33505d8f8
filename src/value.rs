use std::{collections::HashMap, time::Duration};

use thiserror::Error;

/// Dynamically typed value passed to and returned from handler operations.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    List(Vec<Value>),
    Duration(Duration),
    Map(HashMap<String, Value>),
    #[default]
    Null,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Boolean(_) => "Boolean",
            Value::List(_) => "List",
            Value::Duration(_) => "Duration",
            Value::Map(_) => "Map",
            Value::Null => "Null",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Duration> for Value {
    fn from(value: Duration) -> Self {
        Value::Duration(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(value: HashMap<String, Value>) -> Self {
        Value::Map(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OperationError {
    #[error("Argument {index} expected {expected}, got {found}")]
    ArgumentType {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
    #[error("Operation failed: {0}")]
    Failed(String),
}

impl OperationError {
    pub fn failed<S: Into<String>>(message: S) -> Self {
        OperationError::Failed(message.into())
    }
}

pub type OperationResult<T> = Result<T, OperationError>;

/// Conversion from a positional argument. `Default` supplies the zero value
/// bound when the argument is absent or null.
pub trait FromValue: Default + Sized {
    const EXPECTED: &'static str;

    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for i64 {
    const EXPECTED: &'static str = "Integer";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl FromValue for f64 {
    const EXPECTED: &'static str = "Float";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl FromValue for bool {
    const EXPECTED: &'static str = "Boolean";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromValue for String {
    const EXPECTED: &'static str = "String";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromValue for Duration {
    const EXPECTED: &'static str = "Duration";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Duration(d) => Some(*d),
            _ => None,
        }
    }
}

impl FromValue for Vec<Value> {
    const EXPECTED: &'static str = "List";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::List(l) => Some(l.clone()),
            _ => None,
        }
    }
}

impl FromValue for HashMap<String, Value> {
    const EXPECTED: &'static str = "Map";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Map(m) => Some(m.clone()),
            _ => None,
        }
    }
}

impl FromValue for Value {
    const EXPECTED: &'static str = "Value";

    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

/// Positional call arguments shared by the check and outcome operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<Value>);

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn raw(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Binds the argument at `index` to `T`.
    ///
    /// An absent or null argument binds to the zero value of `T`, so operations
    /// keep their fixed arity whatever the caller supplied.
    pub fn get<T: FromValue>(&self, index: usize) -> OperationResult<T> {
        match self.0.get(index) {
            None | Some(Value::Null) => Ok(T::default()),
            Some(value) => T::from_value(value).ok_or(OperationError::ArgumentType {
                index,
                expected: T::EXPECTED,
                found: value.type_name(),
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.0.iter()
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl From<()> for Args {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

impl<const N: usize> From<[Value; N]> for Args {
    fn from(values: [Value; N]) -> Self {
        Self(values.into())
    }
}

impl FromIterator<Value> for Args {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Builds [`Args`] from anything convertible into [`Value`].
///
/// ```
/// use darklaunch::{args, Value};
///
/// let args = args![42, "beta", Value::Null];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        $crate::Args::none()
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Args::new(vec![$($crate::Value::from($value)),+])
    };
}

/// The two result slots produced by an on-pass or on-fail operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub first: Option<Value>,
    pub second: Option<Value>,
}

impl Outcome {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(first: impl Into<Value>) -> Self {
        Self {
            first: Some(first.into()),
            second: None,
        }
    }

    pub fn pair(first: impl Into<Value>, second: impl Into<Value>) -> Self {
        Self {
            first: Some(first.into()),
            second: Some(second.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_none() && self.second.is_none()
    }

    pub fn into_parts(self) -> (Option<Value>, Option<Value>) {
        (self.first, self.second)
    }
}
