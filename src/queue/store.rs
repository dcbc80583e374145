use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// One unit of queued work: run this job. Tickets survive restarts; a
/// redelivered ticket whose job has already left `queued` is skipped by the
/// worker's claim check, so duplicate delivery is harmless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkTicket {
    pub seq: u64,
    pub job_id: String,
    pub attempt: u32,
}

/// Durable single-lane work queue backed by fjall.
///
/// - `tickets` partition: u64 (big-endian) -> WorkTicket (JSON)
/// - `metadata` partition: "next_seq" -> u64
///
/// Tickets are persisted before distribution and removed on ack, after the
/// executor has fully terminated.
pub struct WorkQueue {
    keyspace: Keyspace,
    tickets: PartitionHandle,
    metadata: PartitionHandle,
    seq_counter: Arc<AtomicU64>,
}

impl WorkQueue {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening work queue at: {}", path.as_ref().display());

        let keyspace = Config::new(path).open()?;
        let tickets = keyspace.open_partition("tickets", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        let current_seq = metadata
            .get(b"next_seq")?
            .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(0);

        debug!(current_seq, "Work queue opened");

        Ok(Self {
            keyspace,
            tickets,
            metadata,
            seq_counter: Arc::new(AtomicU64::new(current_seq)),
        })
    }

    /// Persist a ticket and return it with its assigned sequence number.
    pub fn enqueue(&self, job_id: &str, attempt: u32) -> Result<WorkTicket> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);
        let ticket = WorkTicket {
            seq,
            job_id: job_id.to_string(),
            attempt,
        };

        self.tickets
            .insert(seq.to_be_bytes(), serde_json::to_vec(&ticket)?)?;
        self.metadata
            .insert(b"next_seq", (seq + 1).to_be_bytes())?;

        debug!(seq, job_id, "Ticket enqueued");
        Ok(ticket)
    }

    pub fn get(&self, seq: u64) -> Result<Option<WorkTicket>> {
        match self.tickets.get(seq.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Acknowledge a ticket: the executor has fully terminated (or the claim
    /// decided to skip), so the ticket is removed.
    pub fn ack(&self, seq: u64) -> Result<()> {
        self.tickets.remove(seq.to_be_bytes())?;
        debug!(seq, "Ticket acked");
        Ok(())
    }

    /// All unacked tickets in sequence order, for startup redelivery.
    pub fn pending(&self) -> Result<Vec<WorkTicket>> {
        let mut out = Vec::new();
        for item in self.tickets.iter() {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    pub fn health_check(&self) -> Result<()> {
        let _ = self.metadata.get(b"next_seq")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn enqueue_and_retrieve() {
        let temp_dir = TempDir::new().unwrap();
        let queue = WorkQueue::open(temp_dir.path()).unwrap();

        let ticket = queue.enqueue("job1", 1).unwrap();
        assert_eq!(ticket.seq, 0);

        let retrieved = queue.get(ticket.seq).unwrap().unwrap();
        assert_eq!(retrieved.job_id, "job1");
        assert_eq!(retrieved.attempt, 1);
    }

    #[test]
    fn sequence_numbers_are_sequential() {
        let temp_dir = TempDir::new().unwrap();
        let queue = WorkQueue::open(temp_dir.path()).unwrap();

        assert_eq!(queue.enqueue("a", 1).unwrap().seq, 0);
        assert_eq!(queue.enqueue("b", 1).unwrap().seq, 1);
        assert_eq!(queue.enqueue("c", 1).unwrap().seq, 2);
    }

    #[test]
    fn ack_removes_ticket() {
        let temp_dir = TempDir::new().unwrap();
        let queue = WorkQueue::open(temp_dir.path()).unwrap();

        let ticket = queue.enqueue("job1", 1).unwrap();
        queue.ack(ticket.seq).unwrap();

        assert!(queue.get(ticket.seq).unwrap().is_none());
        assert!(queue.pending().unwrap().is_empty());
    }

    #[test]
    fn pending_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();

        {
            let queue = WorkQueue::open(temp_dir.path()).unwrap();
            queue.enqueue("job1", 1).unwrap();
            let acked = queue.enqueue("job2", 1).unwrap();
            queue.ack(acked.seq).unwrap();
            queue.flush().unwrap();
        }

        let queue = WorkQueue::open(temp_dir.path()).unwrap();
        let pending = queue.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].job_id, "job1");

        // Sequence counter continues past the recovered value
        assert_eq!(queue.enqueue("job3", 1).unwrap().seq, 2);
    }
}
