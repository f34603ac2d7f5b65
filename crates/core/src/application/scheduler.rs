//! Scheduler - periodic deploy triggers, one interval job per unit
//!
//! Jobs are keyed `repo_<project id>_<unit name>`, which is unique because
//! the store allows one unit of a given name per project. A job fires first
//! one interval after
//! it is created and then every interval. Ticks that fall due while the
//! previous trigger is still running are skipped, so a job never overlaps
//! with itself.

use crate::domain::{DeployableUnit, UnitId};
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Callback fired for a due unit (normally enqueues it on the work queue)
pub type DeployTrigger = Arc<dyn Fn(UnitId) -> BoxFuture<'static, ()> + Send + Sync>;

struct Job {
    unit_id: UnitId,
    interval: Duration,
    handle: Option<JoinHandle<()>>,
}

impl Job {
    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[derive(Default)]
struct State {
    running: bool,
    jobs: HashMap<String, Job>,
}

pub struct Scheduler {
    trigger: DeployTrigger,
    state: Mutex<State>,
}

impl Scheduler {
    pub fn new(trigger: DeployTrigger) -> Self {
        Self {
            trigger,
            state: Mutex::new(State::default()),
        }
    }

    /// Job key of a unit
    pub fn job_id(unit: &DeployableUnit) -> String {
        format!("repo_{}_{}", unit.project_id, unit.name)
    }

    /// Start firing every registered job
    pub fn start(&self) {
        let mut state = self.lock();
        if state.running {
            return;
        }
        state.running = true;
        for (job_id, job) in state.jobs.iter_mut() {
            job.handle = Some(self.spawn_job(job_id.clone(), job.unit_id, job.interval));
        }
        info!(jobs = state.jobs.len(), "Scheduler started");
    }

    /// Stop firing; registrations are kept so `start` can resume them
    pub fn stop(&self) {
        let mut state = self.lock();
        state.running = false;
        for job in state.jobs.values_mut() {
            job.abort();
        }
        info!("Scheduler stopped");
    }

    /// Register or update the unit's job
    ///
    /// An existing job with the same interval is left alone so its next fire
    /// time is not pushed back; a different interval replaces it.
    pub fn schedule_unit(&self, unit: &DeployableUnit) {
        let job_id = Self::job_id(unit);
        let interval = Duration::from_secs(unit.check_interval_secs.max(1));
        let mut state = self.lock();

        if let Some(existing) = state.jobs.get_mut(&job_id) {
            if existing.interval == interval && existing.unit_id == unit.id {
                return;
            }
            existing.abort();
        }

        let handle = state
            .running
            .then(|| self.spawn_job(job_id.clone(), unit.id, interval));
        state.jobs.insert(
            job_id.clone(),
            Job {
                unit_id: unit.id,
                interval,
                handle,
            },
        );
        info!(
            job_id = %job_id,
            unit_id = unit.id,
            interval_secs = interval.as_secs(),
            "Unit scheduled"
        );
    }

    /// Make the job set match `units` exactly
    pub fn reschedule_all(&self, units: &[DeployableUnit]) {
        let wanted: HashSet<String> = units.iter().map(Self::job_id).collect();
        let stale: Vec<String> = self
            .lock()
            .jobs
            .keys()
            .filter(|job_id| !wanted.contains(*job_id))
            .cloned()
            .collect();

        for job_id in stale {
            self.remove_job(&job_id);
        }
        for unit in units {
            self.schedule_unit(unit);
        }
    }

    /// Remove the unit's job, returns false if none was registered
    pub fn remove_unit(&self, unit: &DeployableUnit) -> bool {
        self.remove_job(&Self::job_id(unit))
    }

    fn remove_job(&self, job_id: &str) -> bool {
        match self.lock().jobs.remove(job_id) {
            Some(mut job) => {
                job.abort();
                info!(job_id = %job_id, "Unit unscheduled");
                true
            }
            None => false,
        }
    }

    /// Interval of a registered job
    pub fn job_interval(&self, job_id: &str) -> Option<Duration> {
        self.lock().jobs.get(job_id).map(|job| job.interval)
    }

    pub fn job_count(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_job(&self, job_id: String, unit_id: UnitId, period: Duration) -> JoinHandle<()> {
        let trigger = Arc::clone(&self.trigger);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                debug!(job_id = %job_id, unit_id = unit_id, "Scheduled check due");
                (trigger)(unit_id).await;
            }
        })
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for job in self.lock().jobs.values_mut() {
            job.abort();
        }
    }
}
