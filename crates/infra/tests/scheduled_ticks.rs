//! Scheduled jobs racing for their lock.

use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};

use bazaar_core::{CampusId, ExpectedVersion, UserId};
use bazaar_infra::config::NegotiationTimeoutSettings;
use bazaar_infra::{run_guarded, JobReport, LockCoordinator, LockTiming, NegotiationTimeoutJob, TickOutcome};
use bazaar_market::{
    Dispute, DisputeId, DisputeRepository, DisputeStatus, InMemoryDisputeRepository, OrderId,
    RecordingNotifier, RepositoryError,
};

/// Holds the first scan open until the test lets it go.
struct Gated {
    inner: Arc<InMemoryDisputeRepository>,
    entered: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl DisputeRepository for Gated {
    fn find(&self, id: DisputeId) -> Result<Option<Dispute>, RepositoryError> {
        self.inner.find(id)
    }

    fn save(&self, dispute: &Dispute, expected: ExpectedVersion) -> Result<Dispute, RepositoryError> {
        self.inner.save(dispute, expected)
    }

    fn find_by_status_before(
        &self,
        status: DisputeStatus,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Dispute>, RepositoryError> {
        let first = self.entered.lock().unwrap().take();
        if let Some(entered) = first {
            entered.send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
        self.inner.find_by_status_before(status, before, limit)
    }
}

fn timing() -> LockTiming {
    LockTiming {
        wait: Duration::ZERO,
        lease: Duration::from_secs(30),
    }
}

#[test]
fn concurrent_negotiation_ticks_run_once() {
    let now = Utc::now();
    let disputes = InMemoryDisputeRepository::arc();
    let stale = disputes.insert(Dispute::open(
        CampusId::new(),
        OrderId::new(),
        UserId::new(),
        UserId::new(),
        now - chrono::Duration::hours(80),
    ));

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gated = Arc::new(Gated {
        inner: disputes.clone(),
        entered: Mutex::new(Some(entered_tx)),
        release: Mutex::new(release_rx),
    });

    let coordinator = Arc::new(LockCoordinator::local());
    let notifier = RecordingNotifier::arc();
    let job = Arc::new(NegotiationTimeoutJob::new(
        gated,
        notifier.clone(),
        NegotiationTimeoutSettings::default(),
    ));

    let winner = {
        let coordinator = coordinator.clone();
        let job = job.clone();
        thread::spawn(move || run_guarded(&coordinator, job.as_ref(), timing(), now))
    };

    // The winner holds the lock and is parked inside its first scan.
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let calls_before = disputes.calls();

    let loser = run_guarded(&coordinator, job.as_ref(), timing(), now);
    assert_eq!(loser, TickOutcome::Skipped);
    assert_eq!(disputes.calls(), calls_before);

    release_tx.send(()).unwrap();
    let outcome = winner.join().unwrap();
    assert_eq!(outcome, TickOutcome::Completed(JobReport { scanned: 1, affected: 1 }));

    assert_eq!(disputes.find(stale.id).unwrap().unwrap().status, DisputeStatus::Arbitrating);
    assert_eq!(notifier.sent().len(), 1);
}

#[test]
fn lock_is_free_after_a_tick() {
    let disputes = InMemoryDisputeRepository::arc();
    let coordinator = LockCoordinator::local();
    let job = NegotiationTimeoutJob::new(disputes, RecordingNotifier::arc(), NegotiationTimeoutSettings::default());

    for _ in 0..3 {
        assert_eq!(
            run_guarded(&coordinator, &job, timing(), Utc::now()),
            TickOutcome::Completed(JobReport::default())
        );
    }
}
