use chrono::Utc;
use futures::future::join_all;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::orchestrator::{ImportOrchestrator, RunOutcome};
use crate::config::{LockConfig, QueueConfig};
use crate::locks::LockManager;
use crate::models::{ExecutionStatus, QueueEntry, QueueStatus};
use crate::queue::QueueManager;
use crate::scheduler::Scheduler;

/// Stateless loop: dequeue, run, report. Everything it knows between two
/// dequeues lives in the store.
#[derive(Clone)]
pub struct ImportWorker {
    worker_id: String,
    queue: QueueManager,
    locks: LockManager,
    orchestrator: ImportOrchestrator,
    scheduler: Option<Scheduler>,
    config: QueueConfig,
}

impl std::fmt::Debug for ImportWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportWorker")
            .field("worker_id", &self.worker_id)
            .finish_non_exhaustive()
    }
}

impl ImportWorker {
    pub fn new(
        worker_id: impl Into<String>,
        queue: QueueManager,
        locks: LockManager,
        orchestrator: ImportOrchestrator,
        scheduler: Option<Scheduler>,
    ) -> Self {
        let config = queue.config().clone();
        Self {
            worker_id: worker_id.into(),
            queue,
            locks,
            orchestrator,
            scheduler,
            config,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn with_id(&self, worker_id: String) -> Self {
        Self {
            worker_id,
            ..self.clone()
        }
    }

    /// Dequeue and run at most one entry. Returns the entry id and outcome,
    /// or `None` when nothing could be claimed.
    pub async fn process_next(&self) -> crate::error::Result<Option<(Uuid, RunOutcome)>> {
        let Some(entry) = self.queue.dequeue_next(&self.worker_id).await? else {
            return Ok(None);
        };
        let request_id = entry.request_id;

        if let (Some(scheduler), Some(execution_id)) = (&self.scheduler, entry.execution_id) {
            if let Err(e) = scheduler.execution_started(execution_id).await {
                warn!(execution_id = %execution_id, error = %e, "Failed to activate reservations");
            }
        }

        let heartbeat = self.spawn_heartbeat(request_id);
        let result = self.orchestrator.run(&entry).await;
        heartbeat.abort();

        match result {
            Ok(outcome) => {
                self.settle(&entry, &outcome).await?;
                Ok(Some((request_id, outcome)))
            }
            Err(e) if e.is_retryable() => {
                warn!(request_id = %request_id, error = %e, "Run interrupted, returning request to the queue");
                self.queue
                    .requeue(request_id, &self.worker_id, &e.to_string())
                    .await?;
                Err(e)
            }
            Err(e) => {
                error!(request_id = %request_id, error = %e, "Run failed outside the phase machine");
                let message = e.to_string();
                if self
                    .queue
                    .complete(request_id, &self.worker_id, QueueStatus::Failed, Some(&message))
                    .await?
                {
                    self.report(&entry, ExecutionStatus::Failed, 0, Some(&message))
                        .await;
                }
                Err(e)
            }
        }
    }

    async fn settle(&self, entry: &QueueEntry, outcome: &RunOutcome) -> crate::error::Result<()> {
        let status = match outcome {
            RunOutcome::ClaimLost { holder } => {
                warn!(request_id = %entry.request_id, holder = ?holder, "Entry reclaimed by another worker, leaving it alone");
                return Ok(());
            }
            RunOutcome::Deferred { .. } => {
                self.queue
                    .requeue(entry.request_id, &self.worker_id, "waiting on prerequisite orchestrations")
                    .await?;
                tokio::time::sleep(self.config.poll_interval()).await;
                return Ok(());
            }
            _ => match outcome.queue_status() {
                Some(status) => status,
                None => return Ok(()),
            },
        };

        let finished = self
            .queue
            .complete(entry.request_id, &self.worker_id, status, outcome.reason())
            .await?;
        if !finished {
            return Ok(());
        }
        if let Some(execution_status) = outcome.execution_status() {
            self.report(
                entry,
                execution_status,
                outcome.records_processed(),
                outcome.reason(),
            )
            .await;
        }
        Ok(())
    }

    async fn report(
        &self,
        entry: &QueueEntry,
        status: ExecutionStatus,
        records_processed: i64,
        error_message: Option<&str>,
    ) {
        let (Some(scheduler), Some(execution_id)) = (&self.scheduler, entry.execution_id) else {
            return;
        };
        if let Err(e) = scheduler
            .handle_completion(execution_id, status, records_processed, error_message, Utc::now())
            .await
        {
            error!(execution_id = %execution_id, error = %e, "Failed to report execution outcome");
        }
    }

    /// Renews the queue heartbeat and pushes lock expiry forward while the
    /// orchestration runs
    fn spawn_heartbeat(&self, request_id: Uuid) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let locks = self.locks.clone();
        let worker_id = self.worker_id.clone();
        let period = self.config.heartbeat_interval();
        let ttl = locks.default_ttl();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match queue.heartbeat(request_id, &worker_id).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => warn!(request_id = %request_id, error = %e, "Heartbeat failed"),
                }
                if let Err(e) = locks.extend(request_id, ttl).await {
                    warn!(request_id = %request_id, error = %e, "Lock extension failed");
                }
            }
        })
    }

    /// Loop until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.worker_id, "Worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let idle = match self.process_next().await {
                Ok(Some((request_id, outcome))) => {
                    debug!(request_id = %request_id, outcome = ?outcome.queue_status(), "Request processed");
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    error!(worker_id = %self.worker_id, error = %e, "Worker iteration failed");
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
        info!(worker_id = %self.worker_id, "Worker stopped");
    }
}

/// N workers plus the watchdog and the scheduler ticker
#[derive(Debug)]
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(worker: ImportWorker, count: usize, lock_config: &LockConfig) -> Self {
        let (shutdown, receiver) = watch::channel(false);
        let mut handles = Vec::with_capacity(count + 2);

        for index in 0..count.max(1) {
            let worker = worker.with_id(format!("{}-{index}", worker.worker_id));
            handles.push(tokio::spawn(worker.run(receiver.clone())));
        }

        handles.push(tokio::spawn(watchdog(
            worker.queue.clone(),
            worker.locks.clone(),
            lock_config.reclaim_interval(),
            receiver.clone(),
        )));

        if let Some(scheduler) = worker.scheduler.clone() {
            let period = scheduler.config().tick_interval();
            handles.push(tokio::spawn(scheduler_ticker(scheduler, period, receiver)));
        }

        info!(workers = count.max(1), "Worker pool started");
        Self { shutdown, handles }
    }

    /// Signal every task and wait for them to finish their current iteration
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}

/// Requeue abandoned entries and reclaim expired locks
async fn watchdog(
    queue: QueueManager,
    locks: LockManager,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        if let Err(e) = queue.requeue_abandoned().await {
            error!(error = %e, "Abandoned request sweep failed");
        }
        if let Err(e) = locks.reclaim_expired().await {
            error!(error = %e, "Expired lock sweep failed");
        }
    }
}

async fn scheduler_ticker(scheduler: Scheduler, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        match scheduler.tick(Utc::now()).await {
            Ok(fired) if !fired.is_empty() => debug!(count = fired.len(), "Scheduler tick fired schedules"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "Scheduler tick failed"),
        }
    }
}
