//! Worker pool: each worker claims one ticket at a time and drives the
//! executor, enforcing the hard deadline and the bounded session-create
//! retry policy. Tickets are acked only after the executor has fully
//! terminated.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::store::{WorkQueue, WorkTicket};
use crate::config::QueueConfig;
use crate::executor::{ExecOutcome, JobExecutor};

pub fn spawn_workers(
    receivers: Vec<mpsc::Receiver<WorkTicket>>,
    queue: Arc<WorkQueue>,
    executor: Arc<JobExecutor>,
    queue_config: QueueConfig,
    hard_deadline_secs: u64,
) -> Vec<JoinHandle<()>> {
    receivers
        .into_iter()
        .enumerate()
        .map(|(worker_id, receiver)| {
            let queue = queue.clone();
            let executor = executor.clone();
            let config = queue_config.clone();
            tokio::spawn(async move {
                worker_loop(worker_id, receiver, queue, executor, config, hard_deadline_secs).await;
            })
        })
        .collect()
}

async fn worker_loop(
    worker_id: usize,
    mut receiver: mpsc::Receiver<WorkTicket>,
    queue: Arc<WorkQueue>,
    executor: Arc<JobExecutor>,
    config: QueueConfig,
    hard_deadline_secs: u64,
) {
    info!(worker_id, "Worker started");
    while let Some(ticket) = receiver.recv().await {
        process_ticket(&ticket, &executor, &config, hard_deadline_secs).await;
        if let Err(err) = queue.ack(ticket.seq) {
            warn!(worker_id, seq = ticket.seq, error = %err, "Ticket ack failed");
        }
    }
    info!(worker_id, "Worker stopped");
}

/// Run the executor for one ticket. Only a transport failure during session
/// creation is retried here, with the configured backoffs; every other
/// outcome is final. The hard deadline kills the run outright.
async fn process_ticket(
    ticket: &WorkTicket,
    executor: &JobExecutor,
    config: &QueueConfig,
    hard_deadline_secs: u64,
) {
    let hard_deadline = Duration::from_secs(hard_deadline_secs);
    let max_attempts = 1 + config.session_create_retries;
    let mut attempt = ticket.attempt;

    loop {
        let outcome = match tokio::time::timeout(hard_deadline, executor.run(&ticket.job_id)).await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(job_id = %ticket.job_id, "Hard deadline exceeded, killing run");
                executor
                    .fail(&ticket.job_id, "job.killed", "hard deadline exceeded")
                    .await;
                return;
            }
        };

        match outcome {
            ExecOutcome::RetrySessionCreate if attempt < max_attempts => {
                let backoff_idx = (attempt as usize).saturating_sub(ticket.attempt as usize);
                let backoff = config
                    .retry_backoff_secs
                    .get(backoff_idx)
                    .or_else(|| config.retry_backoff_secs.last())
                    .copied()
                    .unwrap_or(30);
                warn!(
                    job_id = %ticket.job_id,
                    attempt,
                    backoff_secs = backoff,
                    "Retrying session creation"
                );
                tokio::time::sleep(Duration::from_secs(backoff)).await;
                attempt += 1;
            }
            ExecOutcome::RetrySessionCreate => {
                executor
                    .fail(
                        &ticket.job_id,
                        "agent.unavailable",
                        "agent unreachable after session-create retries",
                    )
                    .await;
                return;
            }
            _ => return,
        }
    }
}
