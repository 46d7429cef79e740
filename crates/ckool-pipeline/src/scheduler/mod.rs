//! Dependency-aware job scheduler
//!
//! Runs a [`JobGraph`] to completion. I/O-bound (`Thread`) jobs get one OS
//! thread each; CPU-bound (`Process`) jobs run on a dedicated rayon pool and
//! own their arguments by value. Workers never touch scheduler state: they
//! talk to the control loop only through the route queues and the two
//! completion channels.
//!
//! The control loop polls. Each pass it:
//!
//! 1. collects completions and, if any job failed, drains and aborts
//! 2. stops once the estimated number of completions has been seen
//! 3. moves successors from the route queues into the ready queues
//! 4. sleeps for the poll interval
//! 5. dispatches every ready job its class has room for

mod routes;
mod worker;

pub use routes::{Route, RouteQueues, RouteSenders};

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::config::{PipelineConfig, DEFAULT_POLL_INTERVAL_MS};
use crate::error::{AggregateError, ErrorEnvelope, PipelineError, Result};
use crate::graph::{JobEstimate, JobGraph};
use crate::job::{Completion, ConcurrencyClass, FunctionId, JobDescriptor, JobId, ReturnPayload};

use worker::{run_job, WorkerContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    /// Concurrently running thread-class jobs; unbounded when `None`
    pub max_thread_workers: Option<usize>,
    /// CPU pool size; one worker per core when `None`
    pub max_process_workers: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_thread_workers: None,
            max_process_workers: None,
        }
    }
}

impl SchedulerConfig {
    /// Worker caps must leave room for at least one job per class
    pub fn validate(&self) -> Result<()> {
        if self.max_thread_workers == Some(0) || self.max_process_workers == Some(0) {
            return Err(PipelineError::config("worker caps must be greater than zero"));
        }
        Ok(())
    }
}

impl From<&PipelineConfig> for SchedulerConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_thread_workers: config.max_thread_workers,
            max_process_workers: config.max_process_workers,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    /// A job failed; no new dispatch, waiting for in-flight jobs
    Draining,
    Terminated,
    Failed,
}

/// Payload of a job whose stage has no successor
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub function: FunctionId,
    pub job_id: JobId,
    pub class: ConcurrencyClass,
    pub payload: ReturnPayload,
}

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub thread_completions: usize,
    pub process_completions: usize,
    pub outputs: Vec<JobOutput>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn total_completions(&self) -> usize {
        self.thread_completions + self.process_completions
    }

    /// Final payloads produced by `function`
    pub fn outputs_of<'a>(&'a self, function: &'a str) -> impl Iterator<Item = &'a ReturnPayload> {
        self.outputs
            .iter()
            .filter(move |o| o.function.as_str() == function)
            .map(|o| &o.payload)
    }
}

/// Per-class bookkeeping
#[derive(Debug)]
struct ClassLane {
    ready: VecDeque<JobDescriptor>,
    in_flight: usize,
    completed: usize,
    done_tx: Sender<Completion>,
    done_rx: Receiver<Completion>,
}

impl ClassLane {
    fn new() -> Self {
        let (done_tx, done_rx) = unbounded();
        Self {
            ready: VecDeque::new(),
            in_flight: 0,
            completed: 0,
            done_tx,
            done_rx,
        }
    }
}

struct ThreadWorker {
    function: FunctionId,
    job_id: JobId,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    graph: Arc<JobGraph>,
    config: SchedulerConfig,
    state: SchedulerState,
    estimate: JobEstimate,
    routes: RouteQueues,
    thread_lane: ClassLane,
    process_lane: ClassLane,
    cpu_pool: rayon::ThreadPool,
    threads: Vec<ThreadWorker>,
    errors: Vec<ErrorEnvelope>,
    outputs: Vec<JobOutput>,
}

impl Scheduler {
    /// Prepare a run and seed the ready queues with the start descriptors
    pub fn new(mut graph: JobGraph, config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let cpu_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_process_workers.unwrap_or(0))
            .thread_name(|i| format!("ckool-cpu-{}", i))
            .build()
            .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;

        let start = graph.take_start();
        let mut scheduler = Self {
            estimate: graph.estimate(),
            graph: Arc::new(graph),
            config,
            state: SchedulerState::Running,
            routes: RouteQueues::new(),
            thread_lane: ClassLane::new(),
            process_lane: ClassLane::new(),
            cpu_pool,
            threads: Vec::new(),
            errors: Vec::new(),
            outputs: Vec::new(),
        };

        for descriptor in start {
            let class = scheduler
                .graph
                .stage(&descriptor.function)
                .map(|s| s.class)
                .ok_or_else(|| PipelineError::UnknownFunction(descriptor.function.clone()))?;
            scheduler.lane_mut(class).ready.push_back(descriptor);
        }

        Ok(scheduler)
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn estimate(&self) -> JobEstimate {
        self.estimate
    }

    /// Block until every expected job has completed or one has failed
    pub fn run(mut self) -> Result<RunSummary> {
        let started = Instant::now();
        info!(
            expected_thread = self.estimate.expected_thread_completions,
            expected_process = self.estimate.expected_process_completions,
            "scheduler started"
        );

        loop {
            self.collect_completions();
            if !self.errors.is_empty() {
                return Err(self.fail());
            }
            if self.completed() >= self.estimate.total() {
                break;
            }

            // Must be sampled before draining routes: a worker enqueues its
            // successor before posting its completion.
            let idle = self.in_flight() == 0;
            self.drain_routes();
            if idle && self.ready() == 0 {
                return Err(self.stall());
            }

            thread::sleep(self.config.poll_interval);
            self.dispatch();
        }

        self.terminate(started)
    }

    fn lane_mut(&mut self, class: ConcurrencyClass) -> &mut ClassLane {
        match class {
            ConcurrencyClass::Thread => &mut self.thread_lane,
            ConcurrencyClass::Process => &mut self.process_lane,
        }
    }

    fn completed(&self) -> usize {
        self.thread_lane.completed + self.process_lane.completed
    }

    fn in_flight(&self) -> usize {
        self.thread_lane.in_flight + self.process_lane.in_flight
    }

    fn ready(&self) -> usize {
        self.thread_lane.ready.len() + self.process_lane.ready.len()
    }

    fn transition(&mut self, next: SchedulerState) {
        debug!(from = ?self.state, to = ?next, "scheduler state change");
        self.state = next;
    }

    fn collect_completions(&mut self) {
        for class in [ConcurrencyClass::Thread, ConcurrencyClass::Process] {
            while let Ok(completion) = self.lane_mut(class).done_rx.try_recv() {
                self.record(completion);
            }
        }
        self.reap_threads();
    }

    fn record(&mut self, completion: Completion) {
        let lane = self.lane_mut(completion.class);
        lane.in_flight = lane.in_flight.saturating_sub(1);

        match completion.outcome {
            Ok(payload) => {
                lane.completed += 1;
                let terminal = self
                    .graph
                    .stage(&completion.function)
                    .map_or(true, |s| s.trigger.is_none());
                if terminal {
                    self.outputs.push(JobOutput {
                        function: completion.function,
                        job_id: completion.job_id,
                        class: completion.class,
                        payload,
                    });
                }
            }
            Err(envelope) => {
                error!(
                    function = %envelope.function,
                    job_id = %envelope.job_id,
                    class = %envelope.class,
                    error = %format!("{:#}", envelope.error),
                    "job failed"
                );
                self.errors.push(envelope);
            }
        }
    }

    /// Join thread workers that have exited; a panic that escaped the job
    /// body is reported like any other failure
    fn reap_threads(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.threads)
            .into_iter()
            .partition(|w| w.handle.is_finished());
        self.threads = running;
        for worker in finished {
            self.join_thread(worker);
        }
    }

    fn join_thread(&mut self, worker: ThreadWorker) {
        if worker.handle.join().is_err() {
            // The completion was never posted.
            self.thread_lane.in_flight = self.thread_lane.in_flight.saturating_sub(1);
            self.errors.push(ErrorEnvelope::new(
                worker.function,
                worker.job_id,
                ConcurrencyClass::Thread,
                anyhow::anyhow!("worker thread panicked"),
            ));
        }
    }

    fn join_all_threads(&mut self) {
        for worker in std::mem::take(&mut self.threads) {
            self.join_thread(worker);
        }
    }

    fn drain_routes(&mut self) {
        for route in Route::ALL {
            let moved: Vec<_> = self.routes.drain(route).collect();
            if !moved.is_empty() {
                debug!(?route, count = moved.len(), "routed successors");
                self.lane_mut(route.destination()).ready.extend(moved);
            }
        }
    }

    fn has_room(&self, class: ConcurrencyClass) -> bool {
        match class {
            ConcurrencyClass::Thread => self
                .config
                .max_thread_workers
                .map_or(true, |cap| self.thread_lane.in_flight < cap),
            ConcurrencyClass::Process => true,
        }
    }

    fn dispatch(&mut self) {
        for class in [ConcurrencyClass::Process, ConcurrencyClass::Thread] {
            while self.has_room(class) {
                let Some(descriptor) = self.lane_mut(class).ready.pop_front() else {
                    break;
                };
                self.spawn(class, descriptor);
            }
        }
    }

    fn spawn(&mut self, class: ConcurrencyClass, descriptor: JobDescriptor) {
        debug!(
            function = %descriptor.function,
            job_id = %descriptor.id,
            class = %class,
            "dispatching job"
        );

        let ctx = WorkerContext {
            graph: Arc::clone(&self.graph),
            routes: self.routes.senders(),
            completions: self.lane_mut(class).done_tx.clone(),
            class,
        };

        match class {
            ConcurrencyClass::Process => {
                self.process_lane.in_flight += 1;
                self.cpu_pool.spawn(move || run_job(ctx, descriptor));
            }
            ConcurrencyClass::Thread => {
                let function = descriptor.function.clone();
                let job_id = descriptor.id;
                let spawned = thread::Builder::new()
                    .name(format!("ckool-io-{}", function))
                    .spawn(move || run_job(ctx, descriptor));

                match spawned {
                    Ok(handle) => {
                        self.thread_lane.in_flight += 1;
                        self.threads.push(ThreadWorker {
                            function,
                            job_id,
                            handle,
                        });
                    }
                    Err(e) => self.errors.push(ErrorEnvelope::new(
                        function,
                        job_id,
                        class,
                        PipelineError::WorkerPool(e.to_string()),
                    )),
                }
            }
        }
    }

    /// Stop dispatching, wait for in-flight jobs, raise every error seen
    fn fail(&mut self) -> PipelineError {
        self.transition(SchedulerState::Draining);
        warn!(
            errors = self.errors.len(),
            in_flight = self.in_flight(),
            "job failure; draining in-flight work"
        );

        while self.in_flight() > 0 {
            thread::sleep(self.config.poll_interval);
            self.collect_completions();
        }
        self.join_all_threads();

        let dropped = self.routes.pending() + self.ready();
        if dropped > 0 {
            debug!(dropped, "discarding undispatched jobs");
        }

        self.transition(SchedulerState::Failed);
        PipelineError::Aggregate(AggregateError {
            errors: std::mem::take(&mut self.errors),
        })
    }

    fn stall(&mut self) -> PipelineError {
        self.join_all_threads();
        self.transition(SchedulerState::Failed);
        let message = format!(
            "no work in flight or queued after {} of {} expected completions",
            self.completed(),
            self.estimate.total()
        );
        warn!("{}", message);
        PipelineError::SchedulingInconsistency(message)
    }

    fn terminate(mut self, started: Instant) -> Result<RunSummary> {
        self.join_all_threads();
        self.collect_completions();

        // A panic surfacing at join time is still a job failure.
        if !self.errors.is_empty() {
            return Err(self.fail());
        }

        let mut problems = Vec::new();
        if self.thread_lane.completed != self.estimate.expected_thread_completions
            || self.process_lane.completed != self.estimate.expected_process_completions
        {
            problems.push(format!(
                "completions thread={} process={} do not match estimate thread={} process={}",
                self.thread_lane.completed,
                self.process_lane.completed,
                self.estimate.expected_thread_completions,
                self.estimate.expected_process_completions
            ));
        }
        let leftover = self.routes.pending() + self.ready() + self.in_flight();
        if leftover > 0 {
            problems.push(format!("{} successor job(s) left undispatched", leftover));
        }
        if !problems.is_empty() {
            self.transition(SchedulerState::Failed);
            return Err(PipelineError::SchedulingInconsistency(problems.join("; ")));
        }

        self.transition(SchedulerState::Terminated);
        let summary = RunSummary {
            thread_completions: self.thread_lane.completed,
            process_completions: self.process_lane.completed,
            outputs: std::mem::take(&mut self.outputs),
            elapsed: started.elapsed(),
        };
        info!(
            thread = summary.thread_completions,
            process = summary.process_completions,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "scheduler finished"
        );
        Ok(summary)
    }
}

/// Execute `graph` and wait for it to finish
pub fn run_graph(graph: JobGraph, config: SchedulerConfig) -> Result<RunSummary> {
    Scheduler::new(graph, config)?.run()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::job::job_fn;
    use serde_json::json;

    fn fast() -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_graph_terminates_immediately() {
        let graph = JobGraph::builder()
            .register("noop", ConcurrencyClass::Thread, job_fn(|_| Ok(ReturnPayload::Empty)))
            .build()
            .unwrap();
        let summary = run_graph(graph, fast()).unwrap();
        assert_eq!(summary.total_completions(), 0);
        assert!(summary.outputs.is_empty());
    }

    #[test]
    fn test_zero_worker_cap_is_rejected() {
        for config in [
            SchedulerConfig {
                max_thread_workers: Some(0),
                ..fast()
            },
            SchedulerConfig {
                max_process_workers: Some(0),
                ..fast()
            },
        ] {
            let graph = JobGraph::builder()
                .register("io", ConcurrencyClass::Thread, job_fn(|_| Ok(ReturnPayload::Empty)))
                .start(JobDescriptor::new("io"))
                .build()
                .unwrap();
            let result = run_graph(graph, config);
            assert!(matches!(result, Err(PipelineError::Config(_))));
        }
    }

    #[test]
    fn test_single_value_is_threaded_through_chain() {
        let graph = JobGraph::builder()
            .register(
                "double",
                ConcurrencyClass::Process,
                job_fn(|input| {
                    let n: i64 = input.arg(0)?;
                    Ok(ReturnPayload::Single(json!(n * 2)))
                }),
            )
            .register(
                "report",
                ConcurrencyClass::Thread,
                job_fn(|input| {
                    let label: String = input.arg(0)?;
                    let n: i64 = input.arg(1)?;
                    Ok(ReturnPayload::Single(json!(format!("{}={}", label, n))))
                }),
            )
            .base_args(
                "report",
                crate::job::StageArgs {
                    args: vec![json!("value")],
                    ..Default::default()
                },
            )
            .trigger("double", "report", true)
            .start(JobDescriptor::new("double").arg(21))
            .build()
            .unwrap();

        let summary = run_graph(graph, fast()).unwrap();
        assert_eq!(summary.process_completions, 1);
        assert_eq!(summary.thread_completions, 1);
        let outputs: Vec<_> = summary.outputs_of("report").collect();
        assert_eq!(outputs, vec![&ReturnPayload::Single(json!("value=42"))]);
    }

    #[test]
    fn test_panicking_job_becomes_error() {
        let graph = JobGraph::builder()
            .register(
                "boom",
                ConcurrencyClass::Process,
                job_fn(|_| panic!("kaboom")),
            )
            .start(JobDescriptor::new("boom"))
            .build()
            .unwrap();

        let err = run_graph(graph, fast()).unwrap_err();
        let errors = err.job_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].error.to_string().contains("kaboom"));
    }

    fn one_job_graph() -> JobGraph {
        JobGraph::builder()
            .register("io", ConcurrencyClass::Thread, job_fn(|_| Ok(ReturnPayload::Empty)))
            .start(JobDescriptor::new("io"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_stall_is_reported_instead_of_hanging() {
        let mut scheduler = Scheduler::new(one_job_graph(), fast()).unwrap();
        scheduler.estimate.expected_thread_completions += 1;

        let err = scheduler.run().unwrap_err();
        assert!(
            matches!(&err, PipelineError::SchedulingInconsistency(m) if m.contains("1 of 2")),
            "{}",
            err
        );
    }

    #[test]
    fn test_undispatched_work_is_reported() {
        let mut scheduler = Scheduler::new(one_job_graph(), fast()).unwrap();
        scheduler.estimate = JobEstimate::default();

        let err = scheduler.run().unwrap_err();
        assert!(matches!(err, PipelineError::SchedulingInconsistency(_)));
    }

    #[test]
    fn test_thread_cap_is_respected() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (running.clone(), peak.clone());

        let graph = JobGraph::builder()
            .register(
                "io",
                ConcurrencyClass::Thread,
                job_fn(move |_| {
                    let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    r.fetch_sub(1, Ordering::SeqCst);
                    Ok(ReturnPayload::Empty)
                }),
            )
            .start_all((0..6).map(|_| JobDescriptor::new("io")))
            .build()
            .unwrap();

        let config = SchedulerConfig {
            max_thread_workers: Some(2),
            ..fast()
        };
        let summary = run_graph(graph, config).unwrap();
        assert_eq!(summary.thread_completions, 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
