use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::domain::{Event, Job};
use crate::events::EventHub;
use crate::sync_ext::MutexExt;

/// Outcome of a dispatch attempt against the hand-off channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The head job was accepted by a worker and removed from the queue.
    Sent,
    /// Every worker slot is occupied; the head job stays queued.
    Busy,
    /// Nothing is queued.
    Empty,
    /// The hand-off channel is gone; the pool is shutting down.
    Closed,
}

/// Ordered, thread-safe FIFO mirror of the pending jobs.
///
/// Mutations publish a `queue_update` snapshot after the lock is released.
/// At most one copy of any job id is pending at a time; a retry re-enqueue
/// happens only after the failing attempt finished.
pub struct JobQueue {
    jobs: Mutex<VecDeque<Job>>,
    hub: Arc<EventHub>,
}

impl JobQueue {
    pub fn new(hub: Arc<EventHub>) -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            hub,
        }
    }

    pub fn enqueue(&self, job: Job) {
        let snapshot = {
            let mut jobs = self.jobs.lock_unpoisoned();
            jobs.push_back(job);
            snapshot_locked(&jobs)
        };
        self.publish(snapshot);
    }

    pub fn peek(&self) -> Option<Job> {
        self.jobs.lock_unpoisoned().front().cloned()
    }

    pub fn dequeue(&self) -> Option<Job> {
        let (job, snapshot) = {
            let mut jobs = self.jobs.lock_unpoisoned();
            let job = jobs.pop_front();
            let snapshot = job.is_some().then(|| snapshot_locked(&jobs));
            (job, snapshot)
        };
        if let Some(snapshot) = snapshot {
            self.publish(snapshot);
        }
        job
    }

    pub fn remove_by_id(&self, id: i64) -> Option<Job> {
        let (job, snapshot) = {
            let mut jobs = self.jobs.lock_unpoisoned();
            let index = jobs.iter().position(|job| job.id == id)?;
            let job = jobs.remove(index);
            let snapshot = snapshot_locked(&jobs);
            (job, Some(snapshot))
        };
        if let Some(snapshot) = snapshot {
            self.publish(snapshot);
        }
        job
    }

    pub fn find_by_id(&self, id: i64) -> Option<(Job, usize)> {
        let jobs = self.jobs.lock_unpoisoned();
        jobs.iter()
            .enumerate()
            .find(|(_, job)| job.id == id)
            .map(|(index, job)| (job.clone(), index))
    }

    pub fn snapshot(&self) -> Vec<Job> {
        snapshot_locked(&self.jobs.lock_unpoisoned())
    }

    pub fn len(&self) -> usize {
        self.jobs.lock_unpoisoned().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock_unpoisoned().is_empty()
    }

    /// Hand the head job to the worker pool. Peek, try-send and dequeue all
    /// happen under the queue mutex, so a job the channel accepted is gone
    /// from the pending set before anyone else can observe it, and a job
    /// that was not accepted is never lost.
    pub fn dispatch_to(&self, slot: &flume::Sender<Job>) -> Dispatch {
        let (result, snapshot) = {
            let mut jobs = self.jobs.lock_unpoisoned();
            let Some(head) = jobs.front().cloned() else {
                return Dispatch::Empty;
            };
            match slot.try_send(head) {
                Ok(()) => {
                    jobs.pop_front();
                    (Dispatch::Sent, Some(snapshot_locked(&jobs)))
                }
                Err(flume::TrySendError::Full(_)) => (Dispatch::Busy, None),
                Err(flume::TrySendError::Disconnected(_)) => (Dispatch::Closed, None),
            }
        };
        if let Some(snapshot) = snapshot {
            self.publish(snapshot);
        }
        result
    }

    fn publish(&self, jobs: Vec<Job>) {
        self.hub.broadcast(&Event::QueueUpdate { jobs });
    }
}

fn snapshot_locked(jobs: &VecDeque<Job>) -> Vec<Job> {
    jobs.iter().cloned().collect()
}
