//! Wall-clock scheduler for periodic maintenance tasks.
//!
//! Jobs run independently of block cadence against committed state. Each job
//! has its own interval; when several are due on the same tick they run one
//! after another in priority order. A failing job is logged and rescheduled
//! at its normal interval.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::destructor::Destructor;
use crate::error::FillerError;

/// Drain order when several jobs are due at once: `High` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High,
    Medium,
    Low,
}

#[async_trait]
pub trait JobTask: Send + Sync {
    async fn run(&self) -> Result<(), FillerError>;
}

/// Adapts an async closure into a [`JobTask`].
pub struct JobFn<F>(F);

pub fn job_fn<F, Fut>(f: F) -> Arc<dyn JobTask>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), FillerError>> + Send + 'static,
{
    Arc::new(JobFn(f))
}

#[async_trait]
impl<F, Fut> JobTask for JobFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), FillerError>> + Send,
{
    async fn run(&self) -> Result<(), FillerError> {
        (self.0)().await
    }
}

struct ScheduledJob {
    id: u64,
    name: String,
    interval: Duration,
    priority: JobPriority,
    task: Arc<dyn JobTask>,
    next_run: Instant,
}

/// Result of one job execution inside [`JobQueue::run_due`].
#[derive(Debug)]
pub struct JobRun {
    pub name: String,
    pub priority: JobPriority,
    pub result: Result<(), FillerError>,
}

/// Periodic job scheduler. Clones share the same job set.
#[derive(Clone, Default)]
pub struct JobQueue {
    jobs: Arc<Mutex<Vec<ScheduledJob>>>,
    next_id: Arc<AtomicU64>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` every `interval`, first run one interval from now.
    /// Job names are unique.
    pub fn add(
        &self,
        name: impl Into<String>,
        interval: Duration,
        priority: JobPriority,
        task: Arc<dyn JobTask>,
    ) -> Result<Destructor, FillerError> {
        self.add_at(name, interval, priority, task, Instant::now())
    }

    /// Like [`add`](Self::add) with an explicit reference time.
    pub fn add_at(
        &self,
        name: impl Into<String>,
        interval: Duration,
        priority: JobPriority,
        task: Arc<dyn JobTask>,
        now: Instant,
    ) -> Result<Destructor, FillerError> {
        let name = name.into();
        if interval.is_zero() {
            return Err(FillerError::Configuration(format!(
                "job '{name}' needs a non-zero interval"
            )));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
            if jobs.iter().any(|j| j.name == name) {
                return Err(FillerError::Configuration(format!(
                    "job '{name}' is already scheduled"
                )));
            }
            debug!(job = %name, ?interval, ?priority, "scheduling job");
            jobs.push(ScheduledJob {
                id,
                name,
                interval,
                priority,
                task,
                next_run: now + interval,
            });
        }

        let jobs = Arc::downgrade(&self.jobs);
        Ok(Destructor::new(move || {
            if let Some(jobs) = jobs.upgrade() {
                jobs.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|j| j.id != id);
            }
        }))
    }

    pub fn names(&self) -> Vec<String> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|j| j.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every job due at `now`, sequentially in priority order, and
    /// reschedule each one interval after `now`. A job removed while an
    /// earlier one runs is skipped; a running job always completes.
    pub async fn run_due(&self, now: Instant) -> Vec<JobRun> {
        let mut due: Vec<(JobPriority, u64, String, Arc<dyn JobTask>)> = {
            let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
            jobs.iter_mut()
                .filter(|j| j.next_run <= now)
                .map(|j| {
                    j.next_run = now + j.interval;
                    (j.priority, j.id, j.name.clone(), Arc::clone(&j.task))
                })
                .collect()
        };
        due.sort_by_key(|(priority, id, _, _)| (*priority, *id));

        let mut runs = Vec::with_capacity(due.len());
        for (priority, id, name, task) in due {
            if !self.is_scheduled(id) {
                debug!(job = %name, "job removed before its turn");
                continue;
            }
            let started = Instant::now();
            let result = task.run().await.map_err(|e| FillerError::Job {
                job: name.clone(),
                reason: e.to_string(),
            });
            match &result {
                Ok(()) => debug!(job = %name, elapsed_ms = started.elapsed().as_millis() as u64, "job finished"),
                Err(e) => warn!(job = %name, error = %e, "job failed; rescheduled"),
            }
            runs.push(JobRun {
                name,
                priority,
                result,
            });
        }
        runs
    }

    fn is_scheduled(&self, id: u64) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|j| j.id == id)
    }

    /// Spawn the ticking loop on the tokio runtime.
    pub fn start(&self, tick: Duration) -> JobQueueHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let queue = self.clone();
        let tick = tick.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            info!(jobs = queue.len(), ?tick, "job queue started");
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        queue.run_due(Instant::now()).await;
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            info!("job queue stopped");
        });
        JobQueueHandle {
            stop: stop_tx,
            task,
        }
    }
}

/// Handle to a running job loop.
pub struct JobQueueHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl JobQueueHandle {
    /// Stop the loop after the job currently running (if any) finishes.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "job queue task ended abnormally");
        }
    }
}
