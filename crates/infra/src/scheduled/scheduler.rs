//! Fixed-interval driver for [`ScheduledJob`]s, one thread per job.

use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::info;

use super::{run_guarded, ScheduledJob};
use crate::lock::{LockCoordinator, LockTiming};

pub struct IntervalScheduler {
    coordinator: Arc<LockCoordinator>,
    timing: LockTiming,
}

/// Handle for a running job thread.
#[derive(Debug)]
pub struct JobRunnerHandle {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl JobRunnerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop after the current tick and join the thread.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

impl IntervalScheduler {
    pub fn new(coordinator: Arc<LockCoordinator>, timing: LockTiming) -> Self {
        Self { coordinator, timing }
    }

    /// Run `job` now and then every `interval` until shut down.
    pub fn spawn(&self, job: Arc<dyn ScheduledJob>, interval: Duration) -> std::io::Result<JobRunnerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let name = job.name();
        let coordinator = self.coordinator.clone();
        let timing = self.timing;
        let interval = interval.max(Duration::from_millis(1));

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || runner_loop(job, coordinator, timing, interval, shutdown_rx))?;

        Ok(JobRunnerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }

    pub fn spawn_all<I>(&self, jobs: I) -> std::io::Result<Vec<JobRunnerHandle>>
    where
        I: IntoIterator<Item = (Arc<dyn ScheduledJob>, Duration)>,
    {
        jobs.into_iter()
            .map(|(job, interval)| self.spawn(job, interval))
            .collect()
    }
}

fn runner_loop(
    job: Arc<dyn ScheduledJob>,
    coordinator: Arc<LockCoordinator>,
    timing: LockTiming,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
) {
    info!(job = job.name(), interval_secs = interval.as_secs(), "scheduled job runner started");

    let mut next_tick = Instant::now();
    loop {
        let wait = next_tick.saturating_duration_since(Instant::now());
        match shutdown_rx.recv_timeout(wait) {
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            // Explicit shutdown or the handle was dropped.
            _ => break,
        }

        run_guarded(&coordinator, job.as_ref(), timing, Utc::now());

        // Keep a stable cadence even if a run overran.
        let now = Instant::now();
        while next_tick <= now {
            next_tick += interval;
        }
    }

    info!(job = job.name(), "scheduled job runner stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduled::{JobError, JobReport};
    use chrono::DateTime;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tick(Arc<AtomicUsize>);

    impl ScheduledJob for Tick {
        fn name(&self) -> &'static str {
            "tick"
        }

        fn run(&self, _: DateTime<Utc>) -> Result<JobReport, JobError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(JobReport::default())
        }
    }

    /// Panics on its first tick only.
    struct PanicsOnce(Arc<AtomicUsize>);

    impl ScheduledJob for PanicsOnce {
        fn name(&self) -> &'static str {
            "panics-once"
        }

        fn run(&self, _: DateTime<Utc>) -> Result<JobReport, JobError> {
            if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first tick fails");
            }
            Ok(JobReport::default())
        }
    }

    #[test]
    fn panicking_tick_does_not_stop_the_runner() {
        let runs = Arc::new(AtomicUsize::new(0));
        let scheduler = IntervalScheduler::new(Arc::new(LockCoordinator::local()), LockTiming::default());

        let handle = scheduler
            .spawn(Arc::new(PanicsOnce(runs.clone())), Duration::from_millis(10))
            .unwrap();
        thread::sleep(Duration::from_millis(150));
        handle.shutdown();

        let seen = runs.load(Ordering::SeqCst);
        assert!(seen >= 3, "runner stopped after the panic, saw {seen} ticks");
    }

    #[test]
    fn runs_on_start_and_on_interval_until_shutdown() {
        let runs = Arc::new(AtomicUsize::new(0));
        let scheduler = IntervalScheduler::new(Arc::new(LockCoordinator::local()), LockTiming::default());

        let handle = scheduler
            .spawn(Arc::new(Tick(runs.clone())), Duration::from_millis(20))
            .unwrap();
        thread::sleep(Duration::from_millis(110));
        handle.shutdown();

        let seen = runs.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected repeated ticks, saw {seen}");

        thread::sleep(Duration::from_millis(50));
        assert_eq!(runs.load(Ordering::SeqCst), seen);
    }
}
