use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::{Job, JobUpdate, TransitionError};

/// Process-wide job table. Clones share the same records.
#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<Mutex<HashMap<String, Job>>>,
}

impl JobStore {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.lock().get(id).cloned()
    }

    pub fn put(&self, id: &str, job: Job) {
        self.lock().insert(id.to_owned(), job);
    }

    pub fn remove(&self, id: &str) -> Option<Job> {
        self.lock().remove(id)
    }

    /// Merges `update` into the stored job. `Ok(None)` when no such job exists.
    pub fn merge(
        &self,
        id: &str,
        update: &JobUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, TransitionError> {
        let mut jobs = self.lock();

        match jobs.get_mut(id) {
            Some(job) => {
                job.apply(update, now)?;
                Ok(Some(job.clone()))
            }
            None => Ok(None),
        }
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.lock().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops terminal jobs whose `completed_at` is older than `ttl`, returning their ids.
    pub fn evict_expired(&self, now: DateTime<Utc>, ttl: Duration) -> Vec<String> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let mut jobs = self.lock();

        let expired: Vec<String> = jobs
            .values()
            .filter(|job| match job.completed_at {
                Some(time) => now.signed_duration_since(time) > ttl,
                None => false,
            })
            .map(|job| job.id.clone())
            .collect();

        for id in &expired {
            jobs.remove(id);
        }

        expired
    }
}
