// Work Queue - priority/dependency-aware dispatch with bounded concurrency

mod shutdown;

pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::project_locks::ProjectLocks;
use crate::domain::{DeployableUnit, DeploymentRecord, DeploymentStatus, UnitId};
use crate::error::Result;
use crate::port::{DeploymentRepository, UnitRepository};
use async_trait::async_trait;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Default number of deployments running at once
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Default delay before an item with unmet dependencies is retried (5s)
pub const DEFAULT_DEPENDENCY_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Sleep after an unexpected dispatch error (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// What the queue dispatches to
#[async_trait]
pub trait DeploymentHandler: Send + Sync {
    /// Deploy a unit; called with the unit's project lock already held
    async fn handle(&self, unit_id: UnitId) -> Result<DeploymentRecord>;
}

#[derive(Debug, Clone)]
pub struct WorkQueueConfig {
    pub max_concurrent: usize,
    pub dependency_retry_delay: Duration,
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            dependency_retry_delay: DEFAULT_DEPENDENCY_RETRY_DELAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueItem {
    unit_id: UnitId,
    priority: i32,
    /// Enqueue order, kept across dependency requeues
    seq: u64,
}

impl Ord for QueueItem {
    // Max-heap: higher priority first, then lower sequence number
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct Shared {
    heap: Mutex<BinaryHeap<QueueItem>>,
    item_ready: Notify,
    next_seq: AtomicU64,
    /// Items enqueued and not yet acknowledged
    outstanding: AtomicUsize,
    drained: Notify,
    semaphore: Arc<Semaphore>,
    locks: Arc<ProjectLocks>,
    units: Arc<dyn UnitRepository>,
    deployments: Arc<dyn DeploymentRepository>,
    handler: Arc<dyn DeploymentHandler>,
    config: WorkQueueConfig,
}

struct Running {
    shutdown: ShutdownSender,
    dispatcher: JoinHandle<()>,
}

/// Acknowledges one queue item when dropped, panics included
struct AckGuard(Arc<Shared>);

impl Drop for AckGuard {
    fn drop(&mut self) {
        self.0.ack();
    }
}

/// Decouples triggers from the deployment engine
///
/// Items leave the heap only once a concurrency permit is free. The permit
/// moves into the spawned deployment task and is released when that task
/// ends, whatever the outcome.
pub struct WorkQueue {
    shared: Arc<Shared>,
    control: tokio::sync::Mutex<Option<Running>>,
}

impl WorkQueue {
    pub fn new(
        config: WorkQueueConfig,
        units: Arc<dyn UnitRepository>,
        deployments: Arc<dyn DeploymentRepository>,
        handler: Arc<dyn DeploymentHandler>,
        locks: Arc<ProjectLocks>,
    ) -> Self {
        let permits = config.max_concurrent.max(1);
        Self {
            shared: Arc::new(Shared {
                heap: Mutex::new(BinaryHeap::new()),
                item_ready: Notify::new(),
                next_seq: AtomicU64::new(0),
                outstanding: AtomicUsize::new(0),
                drained: Notify::new(),
                semaphore: Arc::new(Semaphore::new(permits)),
                locks,
                units,
                deployments,
                handler,
                config,
            }),
            control: tokio::sync::Mutex::new(None),
        }
    }

    /// Queue a unit for deployment (allowed before `start`)
    pub fn enqueue(&self, unit_id: UnitId, priority: i32) {
        let seq = self.shared.next_seq.fetch_add(1, Ordering::SeqCst);
        self.shared.outstanding.fetch_add(1, Ordering::SeqCst);
        self.shared.push(QueueItem {
            unit_id,
            priority,
            seq,
        });
        info!(unit_id = unit_id, priority = priority, "Unit enqueued");
    }

    /// Spawn the dispatch loop (no-op if already running)
    pub async fn start(&self) {
        let mut control = self.control.lock().await;
        if control.is_some() {
            return;
        }

        let (shutdown, token) = shutdown_channel();
        let dispatcher = tokio::spawn(Shared::dispatch_loop(self.shared.clone(), token));
        *control = Some(Running {
            shutdown,
            dispatcher,
        });
    }

    /// Stop dispatching and drop queued work; running deployments finish
    pub async fn stop(&self) {
        let running = self.control.lock().await.take();
        if let Some(running) = running {
            running.shutdown.shutdown();
            if let Err(e) = running.dispatcher.await {
                error!(error = %e, "Work queue dispatcher ended abnormally");
            }
        }

        let dropped = self.shared.clear();
        info!(dropped_items = dropped, "Work queue stopped");
    }

    /// Wait until every enqueued item has been acknowledged
    pub async fn join(&self) {
        loop {
            let drained = self.shared.drained.notified();
            if self.shared.outstanding.load(Ordering::SeqCst) == 0 {
                return;
            }
            drained.await;
        }
    }

    /// Items waiting in the heap
    pub fn pending_len(&self) -> usize {
        self.shared.lock_heap().len()
    }

    /// Items enqueued and not yet acknowledged (waiting, backing off or running)
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::SeqCst)
    }
}

impl Shared {
    fn lock_heap(&self) -> std::sync::MutexGuard<'_, BinaryHeap<QueueItem>> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, item: QueueItem) {
        self.lock_heap().push(item);
        self.item_ready.notify_one();
    }

    /// Push unless stopped; checked under the heap lock so `clear` cannot miss it
    fn push_unless_stopped(&self, item: QueueItem, shutdown: &ShutdownToken) {
        let mut heap = self.lock_heap();
        if shutdown.is_shutdown() {
            drop(heap);
            self.ack();
            return;
        }
        heap.push(item);
        drop(heap);
        self.item_ready.notify_one();
    }

    fn pop(&self) -> Option<QueueItem> {
        self.lock_heap().pop()
    }

    fn clear(&self) -> usize {
        let dropped: Vec<QueueItem> = self.lock_heap().drain().collect();
        for _ in &dropped {
            self.ack();
        }
        dropped.len()
    }

    fn ack(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    async fn next_item(&self) -> QueueItem {
        loop {
            if let Some(item) = self.pop() {
                return item;
            }
            self.item_ready.notified().await;
        }
    }

    async fn dispatch_loop(self: Arc<Self>, mut shutdown: ShutdownToken) {
        info!(
            max_concurrent = self.config.max_concurrent,
            "Work queue dispatcher started"
        );
        loop {
            if shutdown.is_shutdown() {
                break;
            }

            let permit = tokio::select! {
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.wait() => break,
            };

            let item = tokio::select! {
                item = self.next_item() => item,
                _ = shutdown.wait() => break,
            };

            if let Err(e) = self.dispatch(item.clone(), permit, &shutdown).await {
                error!(unit_id = item.unit_id, error = %e, "Work queue dispatch error");
                self.requeue_later(item, shutdown.clone());
                tokio::select! {
                    _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                    _ = shutdown.wait() => break,
                }
            }
        }
        info!("Work queue dispatcher stopped");
    }

    /// Check dependencies, then spawn the deployment holding `permit`
    async fn dispatch(
        self: &Arc<Self>,
        item: QueueItem,
        permit: OwnedSemaphorePermit,
        shutdown: &ShutdownToken,
    ) -> Result<()> {
        let Some(unit) = self.units.find_by_id(item.unit_id).await? else {
            warn!(unit_id = item.unit_id, "Unit no longer exists, dropping queue item");
            self.ack();
            return Ok(());
        };

        let unmet = self.unmet_dependencies(&unit).await?;
        if !unmet.is_empty() {
            info!(
                unit_id = unit.id,
                waiting_on = ?unmet,
                retry_in_ms = self.config.dependency_retry_delay.as_millis() as u64,
                "Dependencies not deployed yet, requeuing"
            );
            drop(permit);
            self.requeue_later(item, shutdown.clone());
            return Ok(());
        }

        let lock = self.locks.lock_for(unit.project_id);
        let shared = Arc::clone(self);
        let unit_id = unit.id;
        let project_id = unit.project_id;

        tokio::spawn(async move {
            let _permit = permit;
            let _ack = AckGuard(Arc::clone(&shared));
            let _project = lock.lock().await;

            info!(unit_id = unit_id, project_id = project_id, "Dispatching deployment");
            match shared.handler.handle(unit_id).await {
                Ok(record) => info!(
                    unit_id = unit_id,
                    deployment_id = record.id,
                    status = %record.status,
                    "Deployment finished"
                ),
                Err(e) => error!(unit_id = unit_id, error = %e, "Deployment could not run"),
            }
        });

        Ok(())
    }

    /// Dependency names whose latest record is not `success`
    async fn unmet_dependencies(&self, unit: &DeployableUnit) -> Result<Vec<String>> {
        let mut unmet = Vec::new();
        for name in &unit.depends_on {
            let Some(dependency) = self.units.find_by_name(unit.project_id, name).await? else {
                unmet.push(format!("{} (unknown unit)", name));
                continue;
            };
            match self.deployments.latest_for_unit(dependency.id).await? {
                Some(record) if record.status == DeploymentStatus::Success => {}
                Some(record) => unmet.push(format!("{} ({})", name, record.status)),
                None => unmet.push(format!("{} (never deployed)", name)),
            }
        }
        Ok(unmet)
    }

    /// Put the item back after the dependency backoff, unless stopped first
    fn requeue_later(self: &Arc<Self>, item: QueueItem, mut shutdown: ShutdownToken) {
        let shared = Arc::clone(self);
        let delay = self.config.dependency_retry_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(delay) => shared.push_unless_stopped(item, &shutdown),
                _ = shutdown.wait() => shared.ack(),
            }
        });
    }
}
