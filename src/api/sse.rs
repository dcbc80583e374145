//! SSE fan-out for `GET /jobs/{id}/events`
//!
//! The stream reads from the store only, never from executor state: a
//! periodic query on a blocking worker feeds batched events into the
//! response. Heartbeat comments keep idle connections alive, and the stream
//! closes after the job has been terminal for a short grace window with no
//! new events.

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use std::convert::Infallible;
use std::time::Duration;

use super::error::ApiError;
use super::models::EventView;
use super::state::AppState;
use crate::ledger::{JobEvent, JobStore};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
const BATCH_LIMIT: usize = 100;
/// Polls a terminal job must stay quiet before the stream closes.
const TERMINAL_GRACE_POLLS: u8 = 3;

pub async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // 404 before the stream starts
    state
        .store
        .get(&job_id)
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(job_id.clone()))?;

    let store = (*state.store).clone();

    let stream = async_stream::stream! {
        let mut cursor = 0u64;
        let mut quiet_terminal_polls = 0u8;

        loop {
            let batch = fetch_batch(&store, &job_id, cursor).await;

            let (events, terminal) = match batch {
                Some(result) => result,
                None => break,
            };

            let had_events = !events.is_empty();
            for event in events {
                cursor = event.id;
                yield Ok::<_, Infallible>(render(event));
            }

            if terminal {
                if had_events {
                    quiet_terminal_polls = 0;
                } else {
                    quiet_terminal_polls += 1;
                    if quiet_terminal_polls >= TERMINAL_GRACE_POLLS {
                        break;
                    }
                }
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEPALIVE_INTERVAL)
            .text("keep-alive"),
    ))
}

/// One store query on the blocking pool: pending events plus terminality.
async fn fetch_batch(
    store: &JobStore,
    job_id: &str,
    cursor: u64,
) -> Option<(Vec<JobEvent>, bool)> {
    let store = store.clone();
    let job_id = job_id.to_string();
    tokio::task::spawn_blocking(move || {
        let events = store.events_since(&job_id, cursor, BATCH_LIMIT).ok()?;
        let terminal = store
            .get(&job_id)
            .ok()?
            .map(|job| job.status.is_terminal())
            .unwrap_or(true);
        Some((events, terminal))
    })
    .await
    .ok()
    .flatten()
}

fn render(event: JobEvent) -> Event {
    let view = EventView {
        job_id: event.job_id,
        status: event.status,
        source: event.source,
        event_type: event.event_type.clone(),
        message: event.message,
        payload: event.payload,
        created_at: event.created_at,
    };
    let data = serde_json::to_string(&view).unwrap_or_else(|_| "{}".to_string());
    Event::default()
        .id(event.id.to_string())
        .event(event.event_type)
        .data(data)
}
