use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, watch};

use strand_core::protocol::{Progress, ThreadStatus};

/// Ring of human-readable summaries of a thread's recent events.
#[derive(Debug, Clone)]
pub struct ProgressLog {
    lines: Arc<Mutex<VecDeque<String>>>,
    limit: usize,
}

impl ProgressLog {
    pub fn new(limit: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::new())),
            limit: limit.max(1),
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.limit {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        lines.iter().cloned().collect()
    }

    pub fn progress(&self) -> Progress {
        Progress {
            recent_logs: self.snapshot(),
        }
    }
}

/// Server-side record of a thread's latest execution.
#[derive(Debug, Clone)]
pub struct ThreadEntry {
    pub thread_id: String,
    /// Identifies the run that owns this entry.
    pub run_id: u64,
    /// Set for detached runs.
    pub job_id: Option<String>,
    pub status: ThreadStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub log: ProgressLog,
    cancel: Arc<watch::Sender<bool>>,
}

/// Handed to the executor when a run is admitted.
#[derive(Debug)]
pub struct Registration {
    pub run_id: u64,
    pub log: ProgressLog,
    pub cancel: watch::Receiver<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlreadyRunning(pub String);

/// In-memory registry of threads and their live executions.
#[derive(Debug, Clone)]
pub struct ThreadRegistry {
    threads: Arc<RwLock<HashMap<String, ThreadEntry>>>,
    next_run: Arc<AtomicU64>,
    log_limit: usize,
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new(50)
    }
}

impl ThreadRegistry {
    pub fn new(log_limit: usize) -> Self {
        Self {
            threads: Arc::new(RwLock::new(HashMap::new())),
            next_run: Arc::new(AtomicU64::new(1)),
            log_limit,
        }
    }

    /// Admit a new run of `thread_id`. At most one run per thread executes at a time.
    pub async fn begin(
        &self,
        thread_id: &str,
        job_id: Option<String>,
    ) -> Result<Registration, AlreadyRunning> {
        let mut threads = self.threads.write().await;
        if let Some(existing) = threads.get(thread_id) {
            if existing.status == ThreadStatus::Running {
                return Err(AlreadyRunning(thread_id.to_string()));
            }
        }

        let run_id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(false);
        let log = ProgressLog::new(self.log_limit);
        threads.insert(
            thread_id.to_string(),
            ThreadEntry {
                thread_id: thread_id.to_string(),
                run_id,
                job_id,
                status: ThreadStatus::Running,
                error: None,
                started_at: Utc::now(),
                finished_at: None,
                log: log.clone(),
                cancel: Arc::new(tx),
            },
        );
        Ok(Registration {
            run_id,
            log,
            cancel: rx,
        })
    }

    pub async fn get(&self, thread_id: &str) -> Option<ThreadEntry> {
        let threads = self.threads.read().await;
        threads.get(thread_id).cloned()
    }

    pub async fn status(&self, thread_id: &str) -> Option<ThreadStatus> {
        self.get(thread_id).await.map(|e| e.status)
    }

    /// Signal cancellation of a running thread. Returns `false` if it was not running.
    pub async fn stop(&self, thread_id: &str) -> bool {
        let mut threads = self.threads.write().await;
        match threads.get_mut(thread_id) {
            Some(entry) if entry.status == ThreadStatus::Running => {
                entry.cancel.send_replace(true);
                entry.status = ThreadStatus::Stopped;
                entry.finished_at = Some(Utc::now());
                tracing::info!(thread_id, "thread stop requested");
                true
            }
            _ => false,
        }
    }

    /// Record the outcome of run `run_id`. A stopped thread stays stopped unless it
    /// completed, and a run that was superseded by a newer one changes nothing.
    pub async fn finish(
        &self,
        thread_id: &str,
        run_id: u64,
        status: ThreadStatus,
        error: Option<String>,
    ) {
        let mut threads = self.threads.write().await;
        let Some(entry) = threads.get_mut(thread_id) else {
            return;
        };
        if entry.run_id != run_id {
            tracing::debug!(thread_id, run_id, current = entry.run_id, "stale run outcome ignored");
            return;
        }
        if entry.status == ThreadStatus::Stopped && status != ThreadStatus::Completed {
            return;
        }
        entry.status = status;
        entry.error = error;
        entry.finished_at = Some(Utc::now());
    }

    pub async fn list(&self) -> Vec<ThreadEntry> {
        let threads = self.threads.read().await;
        let mut list: Vec<_> = threads.values().cloned().collect();
        list.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        list
    }
}
