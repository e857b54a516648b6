use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use tokio::{
    sync::Semaphore,
    task::{spawn_blocking, JoinHandle},
};

use crate::{
    bridge::ProgressBridge,
    engine::{Engine, RawStatus},
    error::ApiError,
    job::Job,
};

pub type JobOutcome = Result<(), ApiError>;

/// Runs engine calls on a bounded set of blocking lanes, never on the
/// threads that serve requests.
#[derive(Clone)]
pub struct JobRunner {
    engine: Arc<dyn Engine>,
    lanes: Arc<Semaphore>,
}

impl JobRunner {
    pub fn new(engine: Arc<dyn Engine>, lanes: usize) -> Self {
        Self {
            engine,
            lanes: Arc::new(Semaphore::new(lanes.max(1))),
        }
    }

    /// Waits for a free lane, then runs `f` against the engine on the
    /// blocking pool. The lane stays taken until `f` returns, even when the
    /// caller stops waiting.
    pub async fn run_blocking<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&dyn Engine) -> T + Send + 'static,
        T: Send + 'static,
    {
        let lane = Arc::clone(&self.lanes)
            .acquire_owned()
            .await
            .map_err(|_| ApiError::Unexpected("engine lanes are closed".to_string()))?;
        let engine = Arc::clone(&self.engine);
        spawn_blocking(move || {
            let _lane = lane;
            f(engine.as_ref())
        })
            .await
            .map_err(|e| ApiError::Unexpected(format!("engine task died: {e}")))
    }

    /// Starts the job. The engine is invoked exactly once; the job keeps
    /// running to completion even if the returned handle is dropped.
    pub fn start(&self, job: Job, bridge: ProgressBridge) -> JobHandle {
        let runner = self.clone();
        let id = job.id.clone();
        let handle = tokio::spawn(async move {
            let spec = job.download_spec();
            let reporter = bridge.clone();
            let outcome = match runner
                .run_blocking(move |engine| engine.download(&spec, &|raw: RawStatus| reporter.on_event(&raw)))
                .await
            {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(ApiError::Engine(e.to_string())),
                Err(e) => Err(e),
            };
            let elapsed = chrono::Utc::now() - job.created_at;
            match &outcome {
                Ok(()) => {
                    bridge.complete();
                    log::info!(
                        "job {} finished in {}s: {}",
                        job.id,
                        elapsed.num_seconds(),
                        job.output_path.display()
                    );
                }
                Err(e) => {
                    bridge.fail(e.stream_message());
                    log::warn!("job {} failed after {}s: {e}", job.id, elapsed.num_seconds());
                }
            }
            outcome
        });
        JobHandle { id, handle }
    }
}

/// Resolves to the job's outcome.
pub struct JobHandle {
    pub id: String,
    handle: JoinHandle<JobOutcome>,
}

impl Future for JobHandle {
    type Output = JobOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(outcome) => outcome,
            Err(e) => Err(ApiError::Unexpected(format!("job task died: {e}"))),
        })
    }
}
