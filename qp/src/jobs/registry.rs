//! In-memory job registry
//!
//! Maps each conversation to its latest job and keeps the bookkeeping of
//! every job started by this process. Each job carries a `watch` channel
//! publishing its record and another carrying its cancellation flag.
//! Finished jobs are dropped once a newer job replaces them as their
//! conversation's latest; their ledger records remain.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, watch};
use tracing::{debug, info};

use super::JobError;
use crate::config::OnActiveJob;
use crate::domain::{ConversationRef, Job, JobId, JobStatus};

struct Entry {
    job: watch::Sender<Job>,
    cancel: watch::Sender<bool>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Entry>,
    latest: HashMap<ConversationRef, JobId>,
}

impl Inner {
    /// Drop finished jobs that no conversation points at any more
    fn prune(&mut self) {
        let latest: HashSet<&JobId> = self.latest.values().collect();
        let before = self.jobs.len();
        self.jobs
            .retain(|id, entry| latest.contains(id) || !entry.job.borrow().status.is_terminal());
        let dropped = before - self.jobs.len();
        if dropped > 0 {
            debug!(dropped, remaining = self.jobs.len(), "pruned finished jobs");
        }
    }
}

/// Result of registering a new job
#[derive(Debug)]
pub struct Registration {
    /// Flips to `true` when the job should stop
    pub cancel: watch::Receiver<bool>,

    /// Previous latest job of the conversation, if any
    pub superseded: Option<JobId>,
}

/// Shared handle; clones see the same jobs
#[derive(Clone, Default)]
pub struct JobRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `job` as the conversation's latest job
    ///
    /// If the conversation's previous job is still running, `policy` decides
    /// whether it is left alone, whether the new job is refused, or whether
    /// the old one is told to stop.
    pub async fn insert(&self, job: Job, policy: OnActiveJob) -> Result<Registration, JobError> {
        let mut inner = self.inner.write().await;
        let owner = job.owner;

        let previous = inner.latest.get(&owner).cloned();
        let running = previous.as_ref().and_then(|id| {
            inner
                .jobs
                .get(id)
                .filter(|entry| !entry.job.borrow().status.is_terminal())
        });

        if let Some(entry) = running {
            let previous_id = entry.job.borrow().id.clone();
            match policy {
                OnActiveJob::Supersede => {
                    debug!(%owner, %previous_id, "superseding running job");
                }
                OnActiveJob::Reject => {
                    return Err(JobError::AlreadyRunning {
                        conversation: owner,
                        job_id: previous_id,
                    });
                }
                OnActiveJob::Cancel => {
                    info!(%owner, %previous_id, "cancelling running job");
                    entry.cancel.send_replace(true);
                }
            }
        }

        let id = job.id.clone();
        let (job_tx, _) = watch::channel(job);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        inner.jobs.insert(
            id.clone(),
            Entry {
                job: job_tx,
                cancel: cancel_tx,
            },
        );
        inner.latest.insert(owner, id);
        inner.prune();

        Ok(Registration {
            cancel: cancel_rx,
            superseded: previous,
        })
    }

    /// Latest job id started for `owner`
    pub async fn latest(&self, owner: ConversationRef) -> Option<JobId> {
        self.inner.read().await.latest.get(&owner).cloned()
    }

    pub async fn get(&self, id: &JobId) -> Option<Job> {
        self.inner.read().await.jobs.get(id).map(|entry| entry.job.borrow().clone())
    }

    pub async fn contains(&self, id: &JobId) -> bool {
        self.inner.read().await.jobs.contains_key(id)
    }

    /// Watch a job's record as it changes
    pub async fn subscribe(&self, id: &JobId) -> Option<watch::Receiver<Job>> {
        self.inner.read().await.jobs.get(id).map(|entry| entry.job.subscribe())
    }

    /// Move `id` on to stage `index`
    pub async fn advance(&self, id: &JobId, index: usize, message: &str) {
        if let Some(entry) = self.inner.read().await.jobs.get(id) {
            entry.job.send_modify(|job| job.advance(index, message));
        }
    }

    /// Record the job's terminal status
    pub async fn finish(&self, id: &JobId, status: JobStatus, message: &str) {
        if let Some(entry) = self.inner.read().await.jobs.get(id) {
            entry.job.send_modify(|job| job.finish(status, message));
        }
    }

    /// Ask a running job to stop; false if unknown or already finished
    pub async fn cancel(&self, id: &JobId) -> bool {
        let inner = self.inner.read().await;
        match inner.jobs.get(id) {
            Some(entry) if !entry.job.borrow().status.is_terminal() => {
                entry.cancel.send_replace(true);
                true
            }
            _ => false,
        }
    }
}
