//! Asynchronous dispatch of orchestration work onto a worker pool.

use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Instant;

use tracing::{debug, error, info};

use bazaar_core::RequestContext;

use crate::error::{BatchError, BatchResult};
use crate::orchestrator::BatchOrchestrator;
use crate::store::BatchTaskStore;
use crate::task::{BatchTask, BatchTaskId};

/// Unit of work handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchJob {
    Orchestrate {
        ctx: RequestContext,
        task_id: BatchTaskId,
    },
    Shard {
        ctx: RequestContext,
        task_id: BatchTaskId,
        shard_key: String,
    },
}

impl DispatchJob {
    pub fn task_id(&self) -> BatchTaskId {
        match self {
            DispatchJob::Orchestrate { task_id, .. } | DispatchJob::Shard { task_id, .. } => *task_id,
        }
    }
}

/// Fire-and-continue submission. Returns as soon as the job is queued.
pub trait TaskDispatcher: Send + Sync {
    fn dispatch(&self, job: DispatchJob) -> BatchResult<()>;
}

impl<D: TaskDispatcher + ?Sized> TaskDispatcher for Arc<D> {
    fn dispatch(&self, job: DispatchJob) -> BatchResult<()> {
        (**self).dispatch(job)
    }
}

fn execute<S: BatchTaskStore>(orchestrator: &BatchOrchestrator<S>, job: &DispatchJob) -> BatchResult<BatchTask> {
    match job {
        DispatchJob::Orchestrate { ctx, task_id } => orchestrator.orchestrate(ctx, *task_id),
        DispatchJob::Shard {
            ctx,
            task_id,
            shard_key,
        } => orchestrator.process_shard(ctx, *task_id, shard_key),
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Worker thread count.
    pub workers: usize,
    /// Name for logging and thread names.
    pub name: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            name: "batch-dispatcher".to_string(),
        }
    }
}

impl DispatcherConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

/// Dispatcher runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DispatcherStats {
    pub jobs_dispatched: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// Fixed pool of worker threads fed by an mpsc queue.
pub struct BatchDispatcher {
    name: String,
    sender: Mutex<Option<mpsc::Sender<DispatchJob>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    stats: Arc<Mutex<DispatcherStats>>,
    started: Instant,
}

impl BatchDispatcher {
    /// Spawn the worker threads.
    pub fn spawn<S>(orchestrator: Arc<BatchOrchestrator<S>>, config: DispatcherConfig) -> BatchResult<Self>
    where
        S: BatchTaskStore + 'static,
    {
        let (tx, rx) = mpsc::channel::<DispatchJob>();
        let rx = Arc::new(Mutex::new(rx));
        let stats = Arc::new(Mutex::new(DispatcherStats::default()));

        let mut workers = Vec::with_capacity(config.workers.max(1));
        for n in 0..config.workers.max(1) {
            let worker_name = format!("{}-{n}", config.name);
            let rx = rx.clone();
            let stats = stats.clone();
            let orchestrator = orchestrator.clone();

            let join = thread::Builder::new()
                .name(worker_name.clone())
                .spawn(move || worker_loop(&worker_name, &orchestrator, &rx, &stats))
                .map_err(|e| BatchError::Dispatch(format!("failed to spawn {}: {e}", config.name)))?;
            workers.push(join);
        }

        info!(dispatcher = %config.name, workers = workers.len(), "batch dispatcher started");

        Ok(Self {
            name: config.name,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            stats,
            started: Instant::now(),
        })
    }

    /// Get current dispatcher statistics.
    pub fn stats(&self) -> DispatcherStats {
        let mut stats = self.stats.lock().map(|s| s.clone()).unwrap_or_default();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }

    /// Stop accepting jobs, let queued jobs drain, and join the workers.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().ok().and_then(|mut s| s.take());
        if sender.is_none() {
            return;
        }
        drop(sender);

        let workers = self
            .workers
            .lock()
            .map(|mut w| std::mem::take(&mut *w))
            .unwrap_or_default();
        for join in workers {
            if join.join().is_err() {
                error!(dispatcher = %self.name, "worker thread panicked");
            }
        }
        info!(dispatcher = %self.name, "batch dispatcher stopped");
    }
}

impl TaskDispatcher for BatchDispatcher {
    fn dispatch(&self, job: DispatchJob) -> BatchResult<()> {
        let sender = self
            .sender
            .lock()
            .map_err(|e| BatchError::Dispatch(e.to_string()))?;
        let sender = sender
            .as_ref()
            .ok_or_else(|| BatchError::Dispatch(format!("{} is shut down", self.name)))?;

        let task_id = job.task_id();
        sender
            .send(job)
            .map_err(|_| BatchError::Dispatch(format!("{} has no live workers", self.name)))?;

        if let Ok(mut s) = self.stats.lock() {
            s.jobs_dispatched += 1;
        }
        debug!(dispatcher = %self.name, task_id = %task_id, "batch job queued");
        Ok(())
    }
}

impl Drop for BatchDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop<S: BatchTaskStore>(
    name: &str,
    orchestrator: &BatchOrchestrator<S>,
    rx: &Mutex<mpsc::Receiver<DispatchJob>>,
    stats: &Mutex<DispatcherStats>,
) {
    debug!(worker = name, "batch worker started");

    loop {
        let job = match rx.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => break,
        };
        // Channel closed: the dispatcher is shutting down.
        let Ok(job) = job else {
            break;
        };

        if let Ok(mut s) = stats.lock() {
            s.current_running += 1;
        }

        let result = execute(orchestrator, &job);

        if let Ok(mut s) = stats.lock() {
            s.current_running = s.current_running.saturating_sub(1);
            match result {
                Ok(_) => s.jobs_completed += 1,
                Err(_) => s.jobs_failed += 1,
            }
        }

        if let Err(e) = result {
            error!(worker = name, task_id = %job.task_id(), error = %e, "batch job failed");
        }
    }

    debug!(worker = name, "batch worker stopped");
}

/// Runs jobs on the calling thread. For tests and single-threaded tools.
pub struct InlineDispatcher<S: BatchTaskStore> {
    orchestrator: Arc<BatchOrchestrator<S>>,
}

impl<S: BatchTaskStore> InlineDispatcher<S> {
    pub fn new(orchestrator: Arc<BatchOrchestrator<S>>) -> Self {
        Self { orchestrator }
    }
}

impl<S: BatchTaskStore> TaskDispatcher for InlineDispatcher<S> {
    fn dispatch(&self, job: DispatchJob) -> BatchResult<()> {
        if let Err(e) = execute(&self.orchestrator, &job) {
            error!(task_id = %job.task_id(), error = %e, "batch job failed");
        }
        Ok(())
    }
}
