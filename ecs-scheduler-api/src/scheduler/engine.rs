//! The cron engine: a time wheel of firing entries and the dispatcher task
//! that drives it.
//!
//! Entries are keyed by job id and replaced atomically on re-insertion.
//! The dispatcher sleeps until the earliest next fire (or a mutation wakes
//! it), then launches due firings on the runtime's worker pool. One firing
//! per job id runs at a time; missed firings coalesce into the next one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{info, warn};

use ecs_scheduler_common::JobDetails;

use crate::cron::CronRule;
use crate::ecs::ClientError;
use crate::execution::{JobExecutor, JobResult};

/// How long past its scheduled moment a firing still counts as a run
/// rather than a miss.
pub const MISFIRE_GRACE_SECONDS: i64 = 3600;

/// Lifecycle events observed by the schedule event handler.
#[derive(Debug)]
pub enum SchedulerEvent {
    Added {
        job_id: String,
    },
    Modified {
        job_id: String,
    },
    Executed {
        job_id: String,
        scheduled_run_time: DateTime<Utc>,
        result: JobResult,
    },
    Failed {
        job_id: String,
        error: Option<ClientError>,
    },
    Missed {
        job_id: String,
        scheduled_run_time: DateTime<Utc>,
    },
    Removed {
        job_id: String,
    },
}

struct Entry {
    details: JobDetails,
    rule: CronRule,
    paused: bool,
    next_fire: Option<DateTime<Utc>>,
    running: bool,
}

pub struct CronEngine {
    executor: Arc<JobExecutor>,
    entries: RwLock<HashMap<String, Entry>>,
    wake: Notify,
    events: mpsc::UnboundedSender<SchedulerEvent>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl CronEngine {
    pub fn new(executor: Arc<JobExecutor>, events: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
        Self {
            executor,
            entries: RwLock::new(HashMap::new()),
            wake: Notify::new(),
            events,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Insert or replace the firing entry for a job.
    ///
    /// A paused entry stays registered but has no next fire.
    pub async fn add_job(&self, details: JobDetails, rule: CronRule, paused: bool) {
        let job_id = details.id.clone();
        let next_fire = if paused {
            None
        } else {
            rule.next_fire_after(Utc::now())
        };
        let replaced = {
            let mut entries = self.entries.write().await;
            entries
                .insert(
                    job_id.clone(),
                    Entry {
                        details,
                        rule,
                        paused,
                        next_fire,
                        running: false,
                    },
                )
                .is_some()
        };
        if replaced {
            self.emit(SchedulerEvent::Modified { job_id });
        } else {
            self.emit(SchedulerEvent::Added { job_id });
        }
        self.wake.notify_one();
    }

    /// Remove the entry for a job. Returns false when no such entry
    /// exists.
    pub async fn remove_job(&self, job_id: &str) -> bool {
        let removed = self.entries.write().await.remove(job_id).is_some();
        if removed {
            self.emit(SchedulerEvent::Removed {
                job_id: job_id.to_string(),
            });
            self.wake.notify_one();
        }
        removed
    }

    /// The next fire time for a job's entry; `None` when the entry has
    /// disappeared from the engine, `Some(None)` when it is paused or
    /// exhausted.
    pub async fn job_next_fire(&self, job_id: &str) -> Option<Option<DateTime<Utc>>> {
        self.entries
            .read()
            .await
            .get(job_id)
            .map(|entry| entry.next_fire)
    }

    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Start the dispatcher task. Starting twice (including after a stop)
    /// has no effect; a stopped engine requires a fresh instance.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Scheduler engine already started; ignoring start request");
            return;
        }
        let engine = self.clone();
        tokio::spawn(async move {
            engine.dispatch_loop().await;
        });
    }

    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            let (due, next_wake) = self.collect_due().await;
            for (job_id, details, scheduled) in due {
                self.fire(job_id, details, scheduled);
            }

            let sleep_for = next_wake
                .map(|at| (at - Utc::now()).to_std().unwrap_or(std::time::Duration::ZERO))
                .unwrap_or(std::time::Duration::from_secs(60))
                .min(std::time::Duration::from_secs(60));
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
        info!("Scheduler engine stopped");
    }

    /// Shut the dispatcher down. In-flight firings complete.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    fn emit(&self, event: SchedulerEvent) {
        // The handler may already be gone during shutdown.
        let _ = self.events.send(event);
    }

    /// Advance due entries, returning the firings to launch and the
    /// earliest upcoming fire time.
    async fn collect_due(
        &self,
    ) -> (
        Vec<(String, JobDetails, DateTime<Utc>)>,
        Option<DateTime<Utc>>,
    ) {
        let now = Utc::now();
        let mut due = Vec::new();
        let mut next_wake: Option<DateTime<Utc>> = None;

        let mut entries = self.entries.write().await;
        for (job_id, entry) in entries.iter_mut() {
            if entry.paused {
                continue;
            }
            let Some(fire_at) = entry.next_fire else {
                continue;
            };
            if fire_at <= now {
                // Missed firings collapse into this one.
                entry.next_fire = entry.rule.next_fire_after(now);
                if now - fire_at > Duration::seconds(MISFIRE_GRACE_SECONDS) {
                    self.emit(SchedulerEvent::Missed {
                        job_id: job_id.clone(),
                        scheduled_run_time: fire_at,
                    });
                } else if entry.running {
                    // One instance per job id at a time.
                    warn!("Job {job_id} is still running; skipping this firing");
                } else {
                    entry.running = true;
                    due.push((job_id.clone(), entry.details.clone(), fire_at));
                }
            }
            if let Some(upcoming) = entry.next_fire {
                next_wake = Some(match next_wake {
                    Some(current) => current.min(upcoming),
                    None => upcoming,
                });
            }
        }
        (due, next_wake)
    }

    /// Launch one firing on the worker pool. Completion clears the
    /// running flag and reports the outcome to the event handler.
    fn fire(self: &Arc<Self>, job_id: String, details: JobDetails, scheduled: DateTime<Utc>) {
        let engine = self.clone();
        tokio::spawn(async move {
            let result = engine.executor.run(&details).await;
            {
                let mut entries = engine.entries.write().await;
                // The entry may have been removed while the firing ran.
                if let Some(entry) = entries.get_mut(&job_id) {
                    entry.running = false;
                }
            }
            match result {
                Ok(result) => engine.emit(SchedulerEvent::Executed {
                    job_id,
                    scheduled_run_time: scheduled,
                    result,
                }),
                Err(error) => engine.emit(SchedulerEvent::Failed {
                    job_id,
                    error: Some(error),
                }),
            }
            engine.wake.notify_one();
        });
    }
}
