//! Engine wiring: collaborators, registries, dispatcher and scheduled jobs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use bazaar_audit::InMemoryAuditLog;
use bazaar_batch::{
    processor_registry, standard_processors, BatchDispatcher, BatchOrchestrator, BatchService,
    DispatcherConfig, GoodsDeps, InMemoryBatchTaskStore,
};
use bazaar_infra::config::{interval, EngineConfig};
use bazaar_infra::{
    AbnormalOrderDetectionJob, IntervalScheduler, JobRunnerHandle, LockCoordinator,
    LogisticsSyncJob, NegotiationTimeoutJob, OrderAutoConfirmJob, PrivacyPurgeJob, ScheduledJob,
};
use bazaar_market::{
    InMemoryDisputeRepository, InMemoryGoodsRepository, InMemoryOrderRepository,
    InMemoryUserRepository, RecordingCache, RecordingNotifier, StaticLogisticsTracker,
};
use bazaar_revert::{standard_strategies, RevertDeps, RevertService, RevertStrategyFactory};

pub type EngineBatchService = BatchService<Arc<InMemoryBatchTaskStore>, Arc<BatchDispatcher>>;

/// Collaborators the engine runs against. Only in-memory implementations
/// ship with the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub goods: Arc<InMemoryGoodsRepository>,
    pub orders: Arc<InMemoryOrderRepository>,
    pub disputes: Arc<InMemoryDisputeRepository>,
    pub users: Arc<InMemoryUserRepository>,
    pub cache: Arc<RecordingCache>,
    pub notifier: Arc<RecordingNotifier>,
    pub logistics: Arc<StaticLogisticsTracker>,
    pub audit: Arc<InMemoryAuditLog>,
    pub batch_store: Arc<InMemoryBatchTaskStore>,
}

impl Collaborators {
    pub fn in_memory() -> Self {
        Self {
            goods: InMemoryGoodsRepository::arc(),
            orders: InMemoryOrderRepository::arc(),
            disputes: InMemoryDisputeRepository::arc(),
            users: InMemoryUserRepository::arc(),
            cache: RecordingCache::arc(),
            notifier: RecordingNotifier::arc(),
            logistics: StaticLogisticsTracker::arc(),
            audit: InMemoryAuditLog::arc(),
            batch_store: InMemoryBatchTaskStore::arc(),
        }
    }
}

/// A wired engine. Prefer [`Engine::shutdown`] over dropping it, which does
/// not wait for job runner threads.
pub struct Engine {
    pub config: EngineConfig,
    pub collaborators: Collaborators,
    pub batch: EngineBatchService,
    pub revert: RevertService,
    pub locks: Arc<LockCoordinator>,
    dispatcher: Arc<BatchDispatcher>,
    runners: Vec<JobRunnerHandle>,
}

impl Engine {
    /// Build registries and start the dispatcher. A registry collision is
    /// fatal.
    pub fn build(config: EngineConfig, collaborators: Collaborators) -> anyhow::Result<Self> {
        let c = &collaborators;

        let processors = processor_registry(standard_processors(
            GoodsDeps::new(c.goods.clone(), c.cache.clone(), c.audit.clone()),
            c.users.clone(),
            c.notifier.clone(),
        ))
        .context("batch processor registry")?;
        info!(types = ?processors.supported(), "batch processors registered");

        let factory = RevertStrategyFactory::new(standard_strategies(
            c.goods.clone(),
            c.orders.clone(),
            c.users.clone(),
            RevertDeps::new(c.audit.clone(), c.audit.clone(), c.cache.clone(), c.notifier.clone()),
        ))
        .context("revert strategy registry")?;
        info!(types = ?factory.supported_entity_types(), "revert strategies registered");

        let orchestrator = Arc::new(BatchOrchestrator::new(c.batch_store.clone(), Arc::new(processors)));
        let dispatcher = Arc::new(
            BatchDispatcher::spawn(
                orchestrator,
                DispatcherConfig::default().with_workers(config.dispatcher.workers),
            )
            .context("batch dispatcher")?,
        );

        let locks = Arc::new(LockCoordinator::connect(config.redis.url.as_deref()));
        info!(mode = ?locks.mode(), "lock coordinator ready");

        Ok(Self {
            batch: BatchService::new(c.batch_store.clone(), dispatcher.clone()),
            revert: RevertService::new(Arc::new(factory), c.audit.clone()),
            locks,
            dispatcher,
            runners: Vec::new(),
            collaborators,
            config,
        })
    }

    /// The five coordination jobs with their configured intervals.
    pub fn scheduled_jobs(&self) -> Vec<(Arc<dyn ScheduledJob>, Duration)> {
        let c = &self.collaborators;
        let jobs = &self.config.jobs;

        vec![
            scheduled(
                OrderAutoConfirmJob::new(c.orders.clone(), c.notifier.clone(), jobs.order_auto_confirm.clone())
                    .with_batch_size(jobs.batch_size),
                jobs.order_auto_confirm.interval_secs,
            ),
            scheduled(
                AbnormalOrderDetectionJob::new(c.orders.clone(), c.notifier.clone(), jobs.abnormal_order_detection.clone())
                    .with_batch_size(jobs.batch_size),
                jobs.abnormal_order_detection.interval_secs,
            ),
            scheduled(
                NegotiationTimeoutJob::new(c.disputes.clone(), c.notifier.clone(), jobs.check_expired_negotiations.clone())
                    .with_batch_size(jobs.batch_size),
                jobs.check_expired_negotiations.interval_secs,
            ),
            scheduled(
                LogisticsSyncJob::new(c.orders.clone(), c.logistics.clone()).with_batch_size(jobs.batch_size),
                jobs.logistics_sync.interval_secs,
            ),
            scheduled(
                PrivacyPurgeJob::new(c.users.clone(), c.cache.clone(), jobs.privacy_purge.clone())
                    .with_batch_size(jobs.batch_size),
                jobs.privacy_purge.interval_secs,
            ),
        ]
    }

    /// Start one runner thread per scheduled job.
    pub fn start_jobs(&mut self) -> anyhow::Result<()> {
        let scheduler = IntervalScheduler::new(self.locks.clone(), self.config.locks.timing());
        let runners = scheduler
            .spawn_all(self.scheduled_jobs())
            .context("failed to spawn scheduled job runner")?;
        info!(jobs = runners.len(), "scheduled jobs started");
        self.runners.extend(runners);
        Ok(())
    }

    /// Stop job runners, then drain and stop the dispatcher.
    pub fn shutdown(mut self) {
        for runner in self.runners.drain(..) {
            let name = runner.name();
            runner.shutdown();
            info!(job = name, "scheduled job stopped");
        }
        self.dispatcher.shutdown();
        let stats = self.dispatcher.stats();
        if stats.jobs_failed > 0 {
            warn!(failed = stats.jobs_failed, "batch jobs failed during this run");
        }
        info!(
            dispatched = stats.jobs_dispatched,
            completed = stats.jobs_completed,
            "engine stopped"
        );
    }
}

fn scheduled<J: ScheduledJob + 'static>(job: J, interval_secs: u64) -> (Arc<dyn ScheduledJob>, Duration) {
    let job: Arc<dyn ScheduledJob> = Arc::new(job);
    (job, interval(interval_secs))
}
