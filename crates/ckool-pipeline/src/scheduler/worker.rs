//! Body executed by every worker, whatever its class

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, info_span, warn};

use crate::error::{ErrorEnvelope, PipelineError};
use crate::graph::JobGraph;
use crate::job::{Completion, ConcurrencyClass, JobDescriptor, ReturnPayload};

use super::routes::RouteSenders;

/// Everything a worker needs, moved into it at spawn time
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub graph: Arc<JobGraph>,
    pub routes: RouteSenders,
    pub completions: Sender<Completion>,
    pub class: ConcurrencyClass,
}

/// Run one job, enqueue its successor, then post its completion.
///
/// The successor is enqueued before the completion is posted, so once the
/// scheduler has counted a completion the successor is already visible on a
/// route queue.
pub(crate) fn run_job(ctx: WorkerContext, descriptor: JobDescriptor) {
    let function = descriptor.function.clone();
    let job_id = descriptor.id;
    let class = ctx.class;

    let span = info_span!("job", function = %function, job_id = %job_id, class = %class);
    let _enter = span.enter();

    let envelope = |error: anyhow::Error| ErrorEnvelope::new(function.clone(), job_id, class, error);

    let outcome = match ctx.graph.stage(&function) {
        None => Err(envelope(PipelineError::UnknownFunction(function.clone()).into())),
        Some(stage) => {
            let body = Arc::clone(&stage.body);
            let input = descriptor.into_input();
            match panic::catch_unwind(AssertUnwindSafe(|| body(input))) {
                Ok(Ok(payload)) => Ok(payload),
                Ok(Err(error)) => Err(envelope(error)),
                Err(panic) => Err(envelope(anyhow::anyhow!(
                    "job panicked: {}",
                    panic_message(panic.as_ref())
                ))),
            }
        }
    };

    let outcome = outcome.and_then(|payload| enqueue_successor(&ctx, &function, payload).map_err(envelope));

    match &outcome {
        Ok(_) => debug!("job finished"),
        Err(e) => debug!(error = %e.error, "job failed"),
    }

    let completion = Completion {
        function: function.clone(),
        job_id,
        class,
        outcome,
    };
    if ctx.completions.send(completion).is_err() {
        warn!("completion channel closed; scheduler is gone");
    }
}

fn enqueue_successor(
    ctx: &WorkerContext,
    function: &crate::job::FunctionId,
    payload: ReturnPayload,
) -> anyhow::Result<ReturnPayload> {
    if let Some((next_class, next)) = ctx.graph.successor(function, payload.clone()) {
        let next_function = next.function.clone();
        let route = ctx.routes.send(ctx.class, next_class, next)?;
        debug!(next = %next_function, ?route, "successor enqueued");
    }
    Ok(payload)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
