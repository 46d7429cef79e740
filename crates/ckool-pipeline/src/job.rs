//! Job descriptions exchanged between the graph, the scheduler and workers
//!
//! Arguments travel as owned `serde_json` values so a descriptor can move to
//! any worker without borrowing from the control loop.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ErrorEnvelope, PipelineError, Result};

/// Unique id of one job invocation
pub type JobId = Uuid;

/// Ordered positional arguments
pub type Args = Vec<Value>;

/// Keyword arguments
pub type Kwargs = serde_json::Map<String, Value>;

/// Name under which a job function is registered
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionId(String);

impl FunctionId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FunctionId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for FunctionId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Where a job function runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyClass {
    /// I/O-bound, one OS thread per job
    Thread,
    /// CPU-bound, runs on the scheduler's rayon pool.
    ///
    /// Isolation here means the job owns its arguments by value and talks to
    /// the control loop only through channels. It still shares the address
    /// space of the process; no child process is spawned.
    Process,
}

impl fmt::Display for ConcurrencyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcurrencyClass::Thread => write!(f, "thread"),
            ConcurrencyClass::Process => write!(f, "process"),
        }
    }
}

/// Static arguments a stage always receives (its `base_func_info` entry)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageArgs {
    #[serde(default)]
    pub args: Args,
    #[serde(default)]
    pub kwargs: Kwargs,
}

/// A concrete invocation waiting in a ready queue
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescriptor {
    pub id: JobId,
    pub function: FunctionId,
    pub args: Args,
    pub kwargs: Kwargs,
}

impl JobDescriptor {
    pub fn new(function: impl Into<FunctionId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            function: function.into(),
            args: Args::new(),
            kwargs: Kwargs::new(),
        }
    }

    /// Append a positional argument
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Append a serializable positional argument
    pub fn arg_serialized<T: Serialize>(self, value: &T) -> Result<Self> {
        let value = serde_json::to_value(value).map_err(ckool_common::CkoolError::from)?;
        Ok(self.arg(value))
    }

    /// Descriptor for `function` seeded with a stage's static arguments
    pub(crate) fn from_stage(function: FunctionId, stage: Option<&StageArgs>) -> Self {
        let mut descriptor = Self::new(function);
        if let Some(stage) = stage {
            descriptor.args = stage.args.clone();
            descriptor.kwargs = stage.kwargs.clone();
        }
        descriptor
    }

    pub(crate) fn into_input(self) -> JobInput {
        JobInput {
            args: self.args,
            kwargs: self.kwargs,
        }
    }
}

/// The arguments a job function is called with
#[derive(Debug, Clone, Default)]
pub struct JobInput {
    pub args: Args,
    pub kwargs: Kwargs,
}

impl JobInput {
    /// Deserialize positional argument `index`
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let value = self.args.get(index).ok_or_else(|| {
            PipelineError::invalid_argument(format!(
                "missing positional argument {} (got {})",
                index,
                self.args.len()
            ))
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            PipelineError::invalid_argument(format!("positional argument {}: {}", index, e))
        })
    }

    /// Deserialize a required keyword argument
    pub fn kwarg<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        self.kwarg_opt(name)?.ok_or_else(|| {
            PipelineError::invalid_argument(format!("missing keyword argument '{}'", name))
        })
    }

    pub fn kwarg_opt<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.kwargs.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
                PipelineError::invalid_argument(format!("keyword argument '{}': {}", name, e))
            }),
        }
    }

    /// Deserialize the whole keyword mapping as one struct
    pub fn kwargs_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.kwargs.clone()))
            .map_err(|e| PipelineError::invalid_argument(format!("keyword arguments: {}", e)))
    }
}

/// What a job hands to its successor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ReturnPayload {
    Empty,
    /// Extends the successor's positional arguments
    Positional(Args),
    /// Updates the successor's keyword arguments
    Keyword(Kwargs),
    /// Appended as one positional argument
    Single(Value),
}

impl ReturnPayload {
    /// Keyword payload from any struct that serializes to an object
    pub fn keyword_from<T: Serialize>(value: &T) -> Result<Self> {
        match serde_json::to_value(value).map_err(ckool_common::CkoolError::from)? {
            Value::Object(map) => Ok(ReturnPayload::Keyword(map)),
            other => Err(PipelineError::InvalidPayload(type_name(&other).to_string())),
        }
    }

    /// Merge into a successor's arguments
    pub fn merge_into(self, args: &mut Args, kwargs: &mut Kwargs) {
        match self {
            ReturnPayload::Empty => {}
            ReturnPayload::Positional(values) => args.extend(values),
            ReturnPayload::Keyword(map) => kwargs.extend(map),
            ReturnPayload::Single(value) => args.push(value),
        }
    }

    /// Deserialize a keyword payload back into a struct
    pub fn keyword_as<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            ReturnPayload::Keyword(map) => serde_json::from_value(Value::Object(map.clone()))
                .map_err(|e| PipelineError::InvalidPayload(e.to_string())),
            other => Err(PipelineError::InvalidPayload(format!(
                "expected keyword payload, got {:?}",
                other
            ))),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ReturnPayload::Empty)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A registered job function body
pub type JobFn = Arc<dyn Fn(JobInput) -> anyhow::Result<ReturnPayload> + Send + Sync>;

/// Wrap a closure as a [`JobFn`]
pub fn job_fn<F>(f: F) -> JobFn
where
    F: Fn(JobInput) -> anyhow::Result<ReturnPayload> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A finished job as posted on its class's completion channel
#[derive(Debug)]
pub struct Completion {
    pub function: FunctionId,
    pub job_id: JobId,
    pub class: ConcurrencyClass,
    pub outcome: std::result::Result<ReturnPayload, ErrorEnvelope>,
}
