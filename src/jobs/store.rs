use super::Job;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// An in-place change to a stored job. Returns whether it was applied.
pub type JobMutation<'a> = Box<dyn FnOnce(&mut Job) -> bool + Send + 'a>;

/// Key-value storage behind [`JobTracker`](super::JobTracker).
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn put(&self, job: Job);
    async fn get(&self, id: &str) -> Option<Job>;
    /// Apply `mutation` atomically. An evicted or unknown job is left absent
    /// and `false` is returned.
    async fn update<'a>(&self, id: &str, mutation: JobMutation<'a>) -> bool;
    /// Delete jobs last updated before `cutoff`, returning how many went.
    async fn remove_updated_before(&self, cutoff: DateTime<Utc>) -> usize;
    async fn len(&self) -> usize;
}

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn put(&self, job: Job) {
        self.jobs.write().await.insert(job.id.clone(), job);
    }

    async fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    async fn update<'a>(&self, id: &str, mutation: JobMutation<'a>) -> bool {
        match self.jobs.write().await.get_mut(id) {
            Some(job) => mutation(job),
            None => false,
        }
    }

    async fn remove_updated_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| job.last_update_at >= cutoff);
        before - jobs.len()
    }

    async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }
}
