//! Background supervision: named periodic jobs plus the frontier
//! expansion agent.
//!
//! Jobs run on fixed intervals with a per-job re-entrancy guard;
//! overlapping runs of the same name are skipped. Errors are caught,
//! counted and logged, never fatal to the supervisor. Shutdown stops new
//! scheduling, waits for in-flight jobs up to a grace period, then aborts.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::domain::error::ForestResult;
use crate::services::hta_store::HtaStore;
use crate::services::project::ProjectService;
use crate::services::session::Session;

/// Boxed future a job returns; errors are counted and logged.
pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

struct JobEntry {
    interval: Duration,
    job: JobFn,
    busy: Arc<AtomicBool>,
    runs: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

/// Per-job counters surfaced by `status`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct JobStatus {
    pub name: String,
    pub runs: u64,
    pub failures: u64,
    pub running: bool,
}

pub struct Supervisor {
    jobs: std::sync::Mutex<HashMap<String, JobEntry>>,
    started: AtomicBool,
    stopping: Arc<AtomicBool>,
    grace_period: Duration,
}

impl Supervisor {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            jobs: std::sync::Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
            stopping: Arc::new(AtomicBool::new(false)),
            grace_period,
        }
    }

    /// Register a named job. Replaces any previous job with the same name
    /// (the old schedule is cancelled).
    pub fn add<F>(&self, name: &str, interval: Duration, job: F)
    where
        F: Fn() -> JobFuture + Send + Sync + 'static,
    {
        let mut jobs = self.jobs.lock().expect("supervisor registry poisoned");
        if let Some(old) = jobs.remove(name) {
            if let Some(handle) = old.handle {
                handle.abort();
            }
        }
        let mut entry = JobEntry {
            interval,
            job: Arc::new(job),
            busy: Arc::new(AtomicBool::new(false)),
            runs: Arc::new(AtomicU64::new(0)),
            failures: Arc::new(AtomicU64::new(0)),
            handle: None,
        };
        if self.started.load(Ordering::Acquire) {
            entry.handle = Some(Self::spawn_loop(name, &entry, self.stopping.clone()));
        }
        jobs.insert(name.to_string(), entry);
    }

    pub fn remove(&self, name: &str) {
        let mut jobs = self.jobs.lock().expect("supervisor registry poisoned");
        if let Some(entry) = jobs.remove(name) {
            if let Some(handle) = entry.handle {
                handle.abort();
            }
        }
    }

    fn spawn_loop(name: &str, entry: &JobEntry, stopping: Arc<AtomicBool>) -> JoinHandle<()> {
        let name = name.to_string();
        let job = entry.job.clone();
        let busy = entry.busy.clone();
        let runs = entry.runs.clone();
        let failures = entry.failures.clone();
        let period = entry.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so jobs start one
            // full period after start().
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if stopping.load(Ordering::Acquire) {
                    break;
                }
                if busy.swap(true, Ordering::AcqRel) {
                    tracing::debug!(job = %name, "previous run still active, skipping tick");
                    continue;
                }
                runs.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = job().await {
                    failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(job = %name, error = %e, "background job failed");
                }
                busy.store(false, Ordering::Release);
            }
        })
    }

    /// Start the schedule for every registered job.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut jobs = self.jobs.lock().expect("supervisor registry poisoned");
        for (name, entry) in jobs.iter_mut() {
            if entry.handle.is_none() {
                entry.handle = Some(Self::spawn_loop(name, entry, self.stopping.clone()));
            }
        }
    }

    /// Stop scheduling, wait out in-flight jobs up to the grace period,
    /// then force termination.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        let handles: Vec<(String, JoinHandle<()>, Arc<AtomicBool>)> = {
            let mut jobs = self.jobs.lock().expect("supervisor registry poisoned");
            jobs.iter_mut()
                .filter_map(|(name, entry)| {
                    entry
                        .handle
                        .take()
                        .map(|h| (name.clone(), h, entry.busy.clone()))
                })
                .collect()
        };

        let deadline = tokio::time::Instant::now() + self.grace_period;
        for (name, handle, busy) in handles {
            while busy.load(Ordering::Acquire) && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            handle.abort();
            if busy.load(Ordering::Acquire) {
                tracing::warn!(job = %name, "job aborted after grace period");
            }
        }
        self.started.store(false, Ordering::Release);
    }

    pub fn status(&self) -> Vec<JobStatus> {
        let jobs = self.jobs.lock().expect("supervisor registry poisoned");
        let mut out: Vec<JobStatus> = jobs
            .iter()
            .map(|(name, entry)| JobStatus {
                name: name.clone(),
                runs: entry.runs.load(Ordering::Relaxed),
                failures: entry.failures.load(Ordering::Relaxed),
                running: entry.busy.load(Ordering::Relaxed),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

/// Watches the active project's frontier and refills it when the eligible
/// count drops below the configured floor.
pub struct ExpansionAgent {
    session: Arc<Session>,
    projects: Arc<ProjectService>,
    store: Arc<HtaStore>,
    min_tasks: usize,
    debug: bool,
}

impl ExpansionAgent {
    pub fn new(
        session: Arc<Session>,
        projects: Arc<ProjectService>,
        store: Arc<HtaStore>,
        min_tasks: usize,
        debug: bool,
    ) -> Self {
        Self {
            session,
            projects,
            store,
            min_tasks,
            debug,
        }
    }

    /// One supervision pass. Also invoked directly on completion and
    /// tree-update notifications for an immediate check.
    pub async fn tick(&self) -> ForestResult<bool> {
        let Some(project_id) = self.session.active_project().await else {
            return Ok(false);
        };
        let path = self
            .projects
            .get(&project_id)
            .await?
            .map_or_else(|| "general".to_string(), |p| p.active_path);

        let refilled = self
            .store
            .refill(&project_id, &path, self.min_tasks)
            .await?
            .is_some();
        if refilled {
            tracing::info!(project = %project_id, "expansion agent refilled the frontier");
        } else if self.debug {
            tracing::debug!(project = %project_id, "expansion agent: frontier satisfied");
        }
        Ok(refilled)
    }

    /// Adapt this agent into a supervisor job.
    pub fn into_job(self: Arc<Self>) -> impl Fn() -> JobFuture + Send + Sync {
        move || {
            let agent = self.clone();
            Box::pin(async move {
                agent.tick().await.map(|_| ()).map_err(anyhow::Error::from)
            }) as JobFuture
        }
    }
}
