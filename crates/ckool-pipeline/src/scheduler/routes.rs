//! Cross-class route queues
//!
//! A finished job hands its successor to the scheduler through one of four
//! queues picked by (current class, next class). The control loop drains all
//! four into the ready queue of the destination class.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::{PipelineError, Result};
use crate::job::{ConcurrencyClass, JobDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    ProcessToProcess,
    ProcessToThread,
    ThreadToProcess,
    ThreadToThread,
}

impl Route {
    pub const ALL: [Route; 4] = [
        Route::ProcessToProcess,
        Route::ProcessToThread,
        Route::ThreadToProcess,
        Route::ThreadToThread,
    ];

    pub fn between(from: ConcurrencyClass, to: ConcurrencyClass) -> Self {
        use ConcurrencyClass::*;
        match (from, to) {
            (Process, Process) => Route::ProcessToProcess,
            (Process, Thread) => Route::ProcessToThread,
            (Thread, Process) => Route::ThreadToProcess,
            (Thread, Thread) => Route::ThreadToThread,
        }
    }

    pub fn destination(self) -> ConcurrencyClass {
        match self {
            Route::ProcessToProcess | Route::ThreadToProcess => ConcurrencyClass::Process,
            Route::ProcessToThread | Route::ThreadToThread => ConcurrencyClass::Thread,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// The receiving side, owned by the scheduler
pub struct RouteQueues {
    senders: [Sender<JobDescriptor>; 4],
    receivers: [Receiver<JobDescriptor>; 4],
}

impl RouteQueues {
    pub fn new() -> Self {
        let (s0, r0) = unbounded();
        let (s1, r1) = unbounded();
        let (s2, r2) = unbounded();
        let (s3, r3) = unbounded();
        Self {
            senders: [s0, s1, s2, s3],
            receivers: [r0, r1, r2, r3],
        }
    }

    /// Sending handles for a worker
    pub fn senders(&self) -> RouteSenders {
        RouteSenders {
            senders: self.senders.clone(),
        }
    }

    /// Everything currently queued on `route`
    pub fn drain(&self, route: Route) -> impl Iterator<Item = JobDescriptor> + '_ {
        self.receivers[route.index()].try_iter()
    }

    pub fn pending(&self) -> usize {
        self.receivers.iter().map(Receiver::len).sum()
    }
}

impl Default for RouteQueues {
    fn default() -> Self {
        Self::new()
    }
}

/// Sending handles handed to every worker at spawn time
#[derive(Clone)]
pub struct RouteSenders {
    senders: [Sender<JobDescriptor>; 4],
}

impl RouteSenders {
    pub fn send(
        &self,
        from: ConcurrencyClass,
        to: ConcurrencyClass,
        descriptor: JobDescriptor,
    ) -> Result<Route> {
        let route = Route::between(from, to);
        self.senders[route.index()]
            .send(descriptor)
            .map_err(|e| {
                PipelineError::SchedulingInconsistency(format!(
                    "route {:?} closed while enqueuing '{}'",
                    route,
                    e.into_inner().function
                ))
            })?;
        Ok(route)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_route_selection_and_destination() {
        for route in Route::ALL {
            let from = match route {
                Route::ProcessToProcess | Route::ProcessToThread => ConcurrencyClass::Process,
                _ => ConcurrencyClass::Thread,
            };
            assert_eq!(Route::between(from, route.destination()), route);
        }
    }

    #[test]
    fn test_descriptor_arrives_on_selected_route() {
        let queues = RouteQueues::new();
        let senders = queues.senders();

        let route = senders
            .send(
                ConcurrencyClass::Process,
                ConcurrencyClass::Thread,
                JobDescriptor::new("upload"),
            )
            .unwrap();
        assert_eq!(route, Route::ProcessToThread);
        assert_eq!(queues.pending(), 1);

        assert_eq!(queues.drain(Route::ThreadToThread).count(), 0);
        let drained: Vec<_> = queues.drain(Route::ProcessToThread).collect();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].function.as_str(), "upload");
        assert_eq!(queues.pending(), 0);
    }
}
