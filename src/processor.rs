use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use uuid::Uuid;

use crate::config::DEFAULT_STAGE_DELAYS;
use crate::error::AppError;
use crate::models::{
    build_path, GenerationRequest, Job, JobHandle, JobUpdate, Locator, OUTPUT_FILE,
};
use crate::store::JobStore;

const QUEUE_CAPACITY: usize = 1024 * 50;

#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub after: Duration,
    pub update: JobUpdate,
}

/// The fixed sequence of simulated pipeline steps every job goes through.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    stages: Vec<Stage>,
}

impl Timeline {
    pub fn from_delays(delays: [Duration; 4]) -> Self {
        let updates = [
            JobUpdate::processing(25),
            JobUpdate::processing(50),
            JobUpdate::processing(75),
            JobUpdate::completed(vec![OUTPUT_FILE.to_owned()]),
        ];

        Timeline {
            stages: delays
                .into_iter()
                .zip(updates)
                .map(|(after, update)| Stage { after, update })
                .collect(),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Time from submission until the last stage fires.
    pub fn total(&self) -> Duration {
        self.stages.last().map(|s| s.after).unwrap_or_default()
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Timeline::from_delays(DEFAULT_STAGE_DELAYS)
    }
}

/// Pending stage firings ordered by deadline.
#[derive(Default)]
pub struct Schedule {
    queue: BinaryHeap<Reverse<(Instant, u64, String, usize)>>,
    sequence: u64,
}

impl Schedule {
    pub fn push_job(&mut self, id: &str, submitted_at: Instant, timeline: &Timeline) {
        for (index, stage) in timeline.stages().iter().enumerate() {
            self.sequence += 1;
            self.queue.push(Reverse((
                submitted_at + stage.after,
                self.sequence,
                id.to_owned(),
                index,
            )));
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.peek().map(|Reverse((at, ..))| *at)
    }

    /// Removes and returns every `(job id, stage index)` due at `now`, oldest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<(String, usize)> {
        let mut due = vec![];

        while let Some(Reverse((at, ..))) = self.queue.peek() {
            if *at > now {
                break;
            }
            if let Some(Reverse((_, _, id, stage))) = self.queue.pop() {
                due.push((id, stage));
            }
        }

        due
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

fn fire_stage(store: &JobStore, timeline: &Timeline, id: &str, index: usize) {
    let Some(stage) = timeline.stages().get(index) else {
        return;
    };

    match store.merge(id, &stage.update, Utc::now()) {
        Ok(Some(job)) => log::info!(
            "[{}] processor: {:?} {}%",
            id,
            job.status,
            job.progress
        ),
        Ok(None) => log::debug!("[{}] processor: no such job registered, ignoring", id),
        Err(err) => log::warn!("[{}] processor: stage {} rejected: {}", id, index + 1, err),
    }
}

/// Drives every submitted job through `timeline`. Returns once all senders are gone and
/// the remaining stages have fired.
pub fn processor(rx: Receiver<String>, store: JobStore, timeline: Timeline) {
    log::info!("Starting lifecycle processor...");

    let mut schedule = Schedule::default();
    let mut connected = true;

    loop {
        let received = match (schedule.next_deadline(), connected) {
            (None, false) => break,
            (None, true) => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            (Some(deadline), true) => {
                rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            }
            (Some(deadline), false) => {
                thread::sleep(deadline.saturating_duration_since(Instant::now()));
                Err(RecvTimeoutError::Timeout)
            }
        };

        match received {
            Ok(id) => {
                log::debug!("[{}] processor: scheduling {} stages", id, timeline.stages().len());
                schedule.push_job(&id, Instant::now(), &timeline);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => connected = false,
        }

        for (id, index) in schedule.pop_due(Instant::now()) {
            fire_stage(&store, &timeline, &id, index);
        }
    }

    log::info!("Lifecycle processor shutdown");
}

/// Creates jobs and hands them to the processor thread.
#[derive(Clone)]
pub struct Simulator {
    store: JobStore,
    channel: SyncSender<String>,
}

impl Simulator {
    pub fn start(store: JobStore, timeline: Timeline) -> Self {
        let (tx, rx) = mpsc::sync_channel(QUEUE_CAPACITY);
        let processor_store = store.clone();

        thread::spawn(move || processor(rx, processor_store, timeline));

        Simulator { store, channel: tx }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn create(&self, request: &GenerationRequest) -> Result<JobHandle, AppError> {
        let parameters = request.validate()?;

        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let job = Job::new(id.clone(), request.prompt.clone(), parameters, created_at);

        self.store.put(&id, job);

        if let Err(err) = self.channel.try_send(id.clone()) {
            self.store.remove(&id);
            let reason = match err {
                TrySendError::Full(_) => "lifecycle queue is full",
                TrySendError::Disconnected(_) => "lifecycle processor is gone",
            };
            return Err(AppError::Internal(format!("[{id}] {reason}")));
        }

        log::info!("[{}] created job for prompt {:?}", id, request.prompt);

        Ok(JobHandle {
            status_url: build_path(&id, Locator::Status),
            download_url: build_path(&id, Locator::Download),
            job_id: id,
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Status;

    fn fast_timeline() -> Timeline {
        Timeline::from_delays([
            Duration::from_millis(10),
            Duration::from_millis(20),
            Duration::from_millis(30),
            Duration::from_millis(40),
        ])
    }

    #[test]
    fn default_timeline_matches_reference_delays() {
        let timeline = Timeline::default();
        let afters: Vec<u64> = timeline
            .stages()
            .iter()
            .map(|s| s.after.as_secs())
            .collect();

        assert_eq!(afters, vec![1, 3, 5, 8]);
        assert_eq!(timeline.total(), Duration::from_secs(8));
        assert_eq!(
            timeline.stages()[3].update,
            JobUpdate::completed(vec!["output.mp4".into()])
        );
    }

    #[test]
    fn schedule_releases_stages_in_time_order() {
        let timeline = Timeline::default();
        let start = Instant::now();
        let mut schedule = Schedule::default();
        schedule.push_job("a", start, &timeline);
        schedule.push_job("b", start + Duration::from_secs(2), &timeline);

        assert_eq!(schedule.next_deadline(), Some(start + Duration::from_secs(1)));
        assert!(schedule.pop_due(start).is_empty());

        let due = schedule.pop_due(start + Duration::from_secs(3));
        assert_eq!(
            due,
            vec![("a".to_string(), 0), ("a".to_string(), 1), ("b".to_string(), 0)]
        );

        let rest = schedule.pop_due(start + Duration::from_secs(60));
        assert_eq!(rest.len(), 5);
        assert!(schedule.is_empty());
    }

    #[test]
    fn create_rejects_invalid_requests_without_storing() {
        let store = JobStore::default();
        let simulator = Simulator::start(store.clone(), fast_timeline());

        let err = simulator
            .create(&GenerationRequest::new("", 4, 8))
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn created_job_reaches_completion() {
        let store = JobStore::default();
        let simulator = Simulator::start(store.clone(), fast_timeline());

        let handle = simulator
            .create(&GenerationRequest::new("test", 4, 8))
            .unwrap();
        assert_eq!(handle.status_url, format!("/status/{}", handle.job_id));
        assert_eq!(handle.download_url, format!("/download/{}", handle.job_id));

        let job = store.get(&handle.job_id).unwrap();
        assert_eq!(job.status, Status::Pending);
        assert_eq!(job.progress, 0);

        thread::sleep(Duration::from_millis(200));

        let job = store.get(&handle.job_id).unwrap();
        assert_eq!(job.status, Status::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.ready);
    }

    #[test]
    fn identical_requests_get_distinct_jobs() {
        let store = JobStore::default();
        let simulator = Simulator::start(store.clone(), fast_timeline());
        let request = GenerationRequest::new("test", 4, 8);

        let ids: Vec<String> = (0..3)
            .map(|_| simulator.create(&request).unwrap().job_id)
            .collect();

        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[1], ids[2]);
        assert_ne!(ids[0], ids[2]);
        assert_eq!(store.len(), 3);
        for id in &ids {
            assert_eq!(&store.get(id).unwrap().id, id);
        }
    }

    #[test]
    fn create_rolls_back_when_processor_is_gone() {
        let store = JobStore::default();
        let (tx, rx) = mpsc::sync_channel(1);
        drop(rx);
        let simulator = Simulator {
            store: store.clone(),
            channel: tx,
        };

        let err = simulator
            .create(&GenerationRequest::new("test", 4, 8))
            .unwrap_err();

        assert!(matches!(err, AppError::Internal(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn create_fails_fast_when_queue_is_full() {
        let store = JobStore::default();
        let (tx, _rx) = mpsc::sync_channel(1);
        let simulator = Simulator {
            store: store.clone(),
            channel: tx,
        };
        let request = GenerationRequest::new("test", 4, 8);

        let accepted = simulator.create(&request).unwrap();
        let err = simulator.create(&request).unwrap_err();

        assert!(matches!(err, AppError::Internal(ref m) if m.contains("queue is full")));
        assert_eq!(store.len(), 1);
        assert!(store.get(&accepted.job_id).is_some());
    }

    #[test]
    fn stages_still_fire_after_simulator_is_dropped() {
        let store = JobStore::default();
        let simulator = Simulator::start(store.clone(), fast_timeline());
        let handle = simulator
            .create(&GenerationRequest::new("test", 4, 8))
            .unwrap();
        drop(simulator);

        thread::sleep(Duration::from_millis(200));

        assert_eq!(store.get(&handle.job_id).unwrap().status, Status::Completed);
    }
}
