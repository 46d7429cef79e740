//! Job graph: which function feeds which, and where each one runs
//!
//! A graph is validated once at construction. Every function named by a
//! start descriptor or a trigger must be registered and carry a concurrency
//! class, and the trigger map must be acyclic. After that the scheduler can
//! look stages up without further checks failing in practice.

use std::collections::{BTreeMap, HashMap};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::job::{ConcurrencyClass, FunctionId, JobDescriptor, JobFn, ReturnPayload, StageArgs};

/// Successor declaration for one function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub next: FunctionId,
    /// Merge the finished job's payload into the successor's arguments
    pub pass_return_values: bool,
}

pub type TriggerMap = BTreeMap<FunctionId, Trigger>;

/// Number of completions a run must observe per concurrency class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobEstimate {
    pub expected_thread_completions: usize,
    pub expected_process_completions: usize,
}

impl JobEstimate {
    pub fn total(&self) -> usize {
        self.expected_thread_completions + self.expected_process_completions
    }

    fn count(&mut self, class: ConcurrencyClass) {
        match class {
            ConcurrencyClass::Thread => self.expected_thread_completions += 1,
            ConcurrencyClass::Process => self.expected_process_completions += 1,
        }
    }
}

/// A resolved stage of the graph
#[derive(Clone)]
pub struct Stage {
    pub function: FunctionId,
    pub class: ConcurrencyClass,
    pub body: JobFn,
    pub trigger: Option<Trigger>,
    pub base: StageArgs,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("function", &self.function)
            .field("class", &self.class)
            .field("trigger", &self.trigger)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct JobGraph {
    stages: HashMap<FunctionId, Stage>,
    start: Vec<JobDescriptor>,
    estimate: JobEstimate,
}

impl JobGraph {
    pub fn builder() -> JobGraphBuilder {
        JobGraphBuilder::default()
    }

    /// Assemble a graph from its separate declarations
    pub fn from_parts(
        registry: HashMap<FunctionId, JobFn>,
        triggers: TriggerMap,
        start: Vec<JobDescriptor>,
        class_map: HashMap<FunctionId, ConcurrencyClass>,
        mut base_func_info: HashMap<FunctionId, StageArgs>,
    ) -> Result<Self> {
        let mut referenced: Vec<&FunctionId> = start.iter().map(|d| &d.function).collect();
        for (from, trigger) in &triggers {
            referenced.push(from);
            referenced.push(&trigger.next);
        }
        for function in &referenced {
            if !registry.contains_key(*function) {
                return Err(PipelineError::UnknownFunction((*function).clone()));
            }
        }

        let mut stages = HashMap::with_capacity(registry.len());
        for (function, body) in registry {
            let class = match class_map.get(&function) {
                Some(class) => *class,
                None if referenced.contains(&&function) => {
                    return Err(PipelineError::MissingClass(function))
                }
                // Registered but never reachable; nothing will dispatch it.
                None => continue,
            };
            let stage = Stage {
                trigger: triggers.get(&function).cloned(),
                base: base_func_info.remove(&function).unwrap_or_default(),
                function: function.clone(),
                class,
                body,
            };
            stages.insert(function, stage);
        }

        check_acyclic(&triggers)?;

        let mut estimate = JobEstimate::default();
        for descriptor in &start {
            let mut current = Some(&descriptor.function);
            while let Some(function) = current {
                let stage = stages
                    .get(function)
                    .ok_or_else(|| PipelineError::UnknownFunction(function.clone()))?;
                estimate.count(stage.class);
                current = stage.trigger.as_ref().map(|t| &t.next);
            }
        }

        debug!(
            stages = stages.len(),
            start = start.len(),
            thread = estimate.expected_thread_completions,
            process = estimate.expected_process_completions,
            "job graph built"
        );

        Ok(Self {
            stages,
            start,
            estimate,
        })
    }

    pub fn estimate(&self) -> JobEstimate {
        self.estimate
    }

    pub fn stage(&self, function: &FunctionId) -> Option<&Stage> {
        self.stages.get(function)
    }

    pub fn start(&self) -> &[JobDescriptor] {
        &self.start
    }

    /// Hand over the start descriptors for seeding a run
    pub(crate) fn take_start(&mut self) -> Vec<JobDescriptor> {
        std::mem::take(&mut self.start)
    }

    /// Descriptor for the stage following `function`, if there is one.
    ///
    /// The successor starts from its static arguments; when the trigger
    /// passes return values the payload is merged on top.
    pub fn successor(
        &self,
        function: &FunctionId,
        payload: ReturnPayload,
    ) -> Option<(ConcurrencyClass, JobDescriptor)> {
        let trigger = self.stages.get(function)?.trigger.as_ref()?;
        let next = self.stages.get(&trigger.next)?;

        let mut descriptor = JobDescriptor::from_stage(next.function.clone(), Some(&next.base));
        if trigger.pass_return_values {
            payload.merge_into(&mut descriptor.args, &mut descriptor.kwargs);
        }
        Some((next.class, descriptor))
    }
}

fn check_acyclic(triggers: &TriggerMap) -> Result<()> {
    let mut graph: DiGraph<&FunctionId, ()> = DiGraph::new();
    let mut index: HashMap<&FunctionId, NodeIndex> = HashMap::new();

    for (from, trigger) in triggers {
        let a = *index.entry(from).or_insert_with(|| graph.add_node(from));
        let b = *index
            .entry(&trigger.next)
            .or_insert_with(|| graph.add_node(&trigger.next));
        graph.add_edge(a, b, ());
    }

    toposort(&graph, None)
        .map(|_| ())
        .map_err(|cycle| PipelineError::CycleDetected(graph[cycle.node_id()].clone()))
}

/// Incremental construction of a [`JobGraph`]
#[derive(Default)]
pub struct JobGraphBuilder {
    registry: HashMap<FunctionId, JobFn>,
    classes: HashMap<FunctionId, ConcurrencyClass>,
    triggers: TriggerMap,
    base: HashMap<FunctionId, StageArgs>,
    start: Vec<JobDescriptor>,
}

impl JobGraphBuilder {
    /// Register a job function and its concurrency class
    pub fn register(
        mut self,
        function: impl Into<FunctionId>,
        class: ConcurrencyClass,
        body: JobFn,
    ) -> Self {
        let function = function.into();
        self.classes.insert(function.clone(), class);
        self.registry.insert(function, body);
        self
    }

    /// Static arguments every job of `function` starts with
    pub fn base_args(mut self, function: impl Into<FunctionId>, args: StageArgs) -> Self {
        self.base.insert(function.into(), args);
        self
    }

    /// Run `next` after every job of `from`
    pub fn trigger(
        mut self,
        from: impl Into<FunctionId>,
        next: impl Into<FunctionId>,
        pass_return_values: bool,
    ) -> Self {
        self.triggers.insert(
            from.into(),
            Trigger {
                next: next.into(),
                pass_return_values,
            },
        );
        self
    }

    /// Add a start condition
    pub fn start(mut self, descriptor: JobDescriptor) -> Self {
        self.start.push(descriptor);
        self
    }

    pub fn start_all(mut self, descriptors: impl IntoIterator<Item = JobDescriptor>) -> Self {
        self.start.extend(descriptors);
        self
    }

    pub fn build(self) -> Result<JobGraph> {
        JobGraph::from_parts(
            self.registry,
            self.triggers,
            self.start,
            self.classes,
            self.base,
        )
    }
}
