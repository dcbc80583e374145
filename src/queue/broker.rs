use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::store::{QueueError, WorkQueue, WorkTicket};

/// Distributes durable work tickets to the worker pool.
///
/// 1. The orchestrator calls `broker.enqueue(job_id)`
/// 2. The broker persists the ticket (atomic, gets a sequence number)
/// 3. The ticket is sent to a worker over a bounded mpsc channel
/// 4. Round-robin across the pool; a full channel applies back-pressure
///
/// The broker is not a task, just a struct whose methods are called by the
/// orchestrator. A closed worker channel is tolerated: the ticket is already
/// durable and is redelivered on the next startup.
pub struct WorkBroker {
    queue: Arc<WorkQueue>,
    worker_channels: Vec<mpsc::Sender<WorkTicket>>,
    next_worker: AtomicUsize,
}

impl WorkBroker {
    /// Returns the broker plus one receiver per worker slot.
    pub fn new(
        queue: Arc<WorkQueue>,
        num_workers: usize,
        channel_size: usize,
    ) -> (Self, Vec<mpsc::Receiver<WorkTicket>>) {
        info!(num_workers, channel_size, "Creating work broker");

        let mut worker_channels = Vec::with_capacity(num_workers);
        let mut worker_receivers = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            let (tx, rx) = mpsc::channel(channel_size);
            worker_channels.push(tx);
            worker_receivers.push(rx);
        }

        let broker = Self {
            queue,
            worker_channels,
            next_worker: AtomicUsize::new(0),
        };
        (broker, worker_receivers)
    }

    /// Persist and distribute one ticket. Returns the durable ticket.
    pub async fn enqueue(&self, job_id: &str) -> Result<WorkTicket, QueueError> {
        let ticket = self.queue.enqueue(job_id, 1)?;
        self.dispatch(ticket.clone()).await;
        Ok(ticket)
    }

    /// Re-send tickets that were persisted but never acked (startup path).
    pub async fn redeliver_pending(&self) -> Result<usize, QueueError> {
        let pending = self.queue.pending()?;
        let count = pending.len();
        for ticket in pending {
            self.dispatch(ticket).await;
        }
        if count > 0 {
            info!(count, "Redelivered pending tickets");
        }
        Ok(count)
    }

    async fn dispatch(&self, ticket: WorkTicket) {
        let worker_idx =
            self.next_worker.fetch_add(1, Ordering::Relaxed) % self.worker_channels.len();
        match self.worker_channels[worker_idx].send(ticket.clone()).await {
            Ok(()) => debug!(seq = ticket.seq, worker_idx, "Ticket sent to worker"),
            Err(_) => {
                // Worker is gone; the ticket stays durable for redelivery
                warn!(seq = ticket.seq, worker_idx, "Worker channel closed, ticket not delivered");
            }
        }
    }

    pub fn num_workers(&self) -> usize {
        self.worker_channels.len()
    }

    pub fn health_check(&self) -> bool {
        self.worker_channels.iter().any(|ch| !ch.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_queue(temp: &TempDir) -> Arc<WorkQueue> {
        Arc::new(WorkQueue::open(temp.path()).unwrap())
    }

    #[tokio::test]
    async fn enqueue_persists_then_distributes() {
        let temp = TempDir::new().unwrap();
        let queue = open_queue(&temp);
        let (broker, mut receivers) = WorkBroker::new(queue.clone(), 2, 10);

        let ticket = broker.enqueue("job1").await.unwrap();
        assert_eq!(ticket.seq, 0);

        let envelope = receivers[0].recv().await.unwrap();
        assert_eq!(envelope.job_id, "job1");

        // Durable copy exists until acked
        assert!(queue.get(ticket.seq).unwrap().is_some());
    }

    #[tokio::test]
    async fn round_robin_across_workers() {
        let temp = TempDir::new().unwrap();
        let (broker, mut receivers) = WorkBroker::new(open_queue(&temp), 3, 10);

        for i in 0..6 {
            broker.enqueue(&format!("job{i}")).await.unwrap();
        }

        for (worker_id, receiver) in receivers.iter_mut().enumerate() {
            let first = receiver.recv().await.unwrap();
            let second = receiver.recv().await.unwrap();
            assert_eq!(first.seq as usize, worker_id);
            assert_eq!(second.seq as usize, worker_id + 3);
        }
    }

    #[tokio::test]
    async fn ticket_survives_dead_worker() {
        let temp = TempDir::new().unwrap();
        let queue = open_queue(&temp);
        let (broker, receivers) = WorkBroker::new(queue.clone(), 1, 10);
        drop(receivers); // worker crashed

        let ticket = broker.enqueue("job1").await.unwrap();
        assert_eq!(queue.get(ticket.seq).unwrap().unwrap().job_id, "job1");
    }

    #[tokio::test]
    async fn redelivers_pending_on_startup() {
        let temp = TempDir::new().unwrap();
        let queue = open_queue(&temp);
        queue.enqueue("leftover", 1).unwrap();

        let (broker, mut receivers) = WorkBroker::new(queue, 1, 10);
        let count = broker.redeliver_pending().await.unwrap();
        assert_eq!(count, 1);

        let ticket = receivers[0].recv().await.unwrap();
        assert_eq!(ticket.job_id, "leftover");
    }
}
