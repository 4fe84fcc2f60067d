use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::context::AppContext;
use crate::domain::{Job, WorkerInfo};
use crate::queue::{Dispatch, JobQueue};
use crate::sync_ext::RwLockExt;
use crate::worker::Worker;

/// Poll cadence when the queue is empty or every worker slot is taken.
const DISPATCH_IDLE: Duration = Duration::from_millis(100);

/// Fixed-size pool of workers fed from the in-memory queue through a
/// bounded hand-off channel.
///
/// The dispatcher peeks the queue and only dequeues a job the channel has
/// accepted, so shutdown can never lose a job between dequeue and hand-off.
pub struct WorkerPool {
    cancel: CancellationToken,
    tracker: TaskTracker,
    infos: Vec<Arc<RwLock<WorkerInfo>>>,
}

impl WorkerPool {
    /// Spawn the worker tasks and the dispatcher.
    pub fn start(ctx: AppContext, cancel: CancellationToken) -> Self {
        let worker_count = ctx.config.workers.max(1);
        let (handoff_tx, handoff_rx) = flume::bounded::<Job>(worker_count);
        let tracker = TaskTracker::new();

        let mut infos = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let worker = Worker::new(id, ctx.clone(), cancel.clone());
            infos.push(worker.info_handle());
            tracker.spawn(worker.run(handoff_rx.clone()));
        }
        info!(workers = worker_count, "worker pool started");

        tracker.spawn(run_dispatcher(
            ctx.queue.clone(),
            handoff_tx,
            cancel.clone(),
        ));

        Self {
            cancel,
            tracker,
            infos,
        }
    }

    /// The pool's cancellation token, for surfaces (like WebSocket
    /// sessions) that must observe shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Snapshot of every worker's public state.
    pub fn worker_infos(&self) -> Vec<WorkerInfo> {
        self.infos
            .iter()
            .map(|info| info.read_unpoisoned().clone())
            .collect()
    }

    /// Stop dispatching, cancel in-flight work, and wait for the workers to
    /// drain. Returns false when the deadline elapsed first.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.cancel.cancel();
        self.tracker.close();
        tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok()
    }
}

/// Single-producer dispatcher: hand the queue head to an idle worker,
/// backing off briefly when there is nothing to do.
async fn run_dispatcher(queue: Arc<JobQueue>, slot: flume::Sender<Job>, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match queue.dispatch_to(&slot) {
            Dispatch::Sent => {}
            Dispatch::Busy | Dispatch::Empty => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(DISPATCH_IDLE) => {}
                }
            }
            Dispatch::Closed => break,
        }
    }
    // Dropping the sender closes the hand-off channel; idle workers
    // observe the disconnect and return.
    debug!("dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventHub;

    fn job(id: i64) -> Job {
        Job {
            id,
            input_path: format!("in-{id}.mp4"),
            output_path: format!("out-{id}.mp4"),
        }
    }

    #[tokio::test]
    async fn dispatcher_feeds_queued_jobs_in_order() {
        let queue = Arc::new(JobQueue::new(Arc::new(EventHub::new())));
        queue.enqueue(job(1));
        queue.enqueue(job(2));

        let (tx, rx) = flume::bounded::<Job>(1);
        let cancel = CancellationToken::new();
        let dispatcher = tokio::spawn(run_dispatcher(queue.clone(), tx, cancel.clone()));

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv_async())
            .await
            .expect("first job in time")
            .expect("first job");
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv_async())
            .await
            .expect("second job in time")
            .expect("second job");
        assert_eq!((first.id, second.id), (1, 2));
        assert!(queue.is_empty());

        cancel.cancel();
        dispatcher.await.expect("dispatcher exits");
        // The dispatcher dropped its sender; the channel is now closed.
        assert!(rx.recv_async().await.is_err());
    }

    #[tokio::test]
    async fn dispatcher_exits_promptly_when_cancelled_while_idle() {
        let queue = Arc::new(JobQueue::new(Arc::new(EventHub::new())));
        let (tx, _rx) = flume::bounded::<Job>(1);
        let cancel = CancellationToken::new();

        let dispatcher = tokio::spawn(run_dispatcher(queue, tx, cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), dispatcher)
            .await
            .expect("dispatcher exits in time")
            .expect("dispatcher task");
    }
}
