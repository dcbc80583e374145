//! Event bridge: the agent's SSE stream, filtered and normalized
//!
//! One long-lived `GET /event` connection per executing job. Events are
//! filtered by session id and normalized to a small vocabulary before being
//! handed to the executor over a bounded channel. The bridge is advisory:
//! it accelerates convergence, but the executor's polling sweep is the
//! correctness path, so a dead bridge only costs latency.
//!
//! Delivery policy on a full channel: `message.part.updated` ticks are
//! coalesced (dropped), while permission and session events block the
//! producer until the executor drains them.

use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::client::AgentClient;
use crate::config::LimitsConfig;

/// Normalized event vocabulary seen by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    SessionUpdated,
    SessionRetry,
    PermissionAsked,
    MessagePartUpdated,
    /// The stream reconnected (or gave up); the executor must run a poll
    /// sweep because events may have been missed in the gap.
    Resync,
}

pub struct EventBridge {
    rx: mpsc::Receiver<BridgeEvent>,
    task: JoinHandle<()>,
}

impl EventBridge {
    /// Spawn the bridge task for one job execution.
    pub fn spawn(
        client: Arc<AgentClient>,
        directory: String,
        session_id: String,
        limits: &LimitsConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let floor = Duration::from_secs(limits.event_backoff_floor_secs);
        let ceiling = Duration::from_secs(limits.event_backoff_ceiling_secs);
        let max_retries = limits.event_max_retries;

        let task = tokio::spawn(async move {
            run_stream(client, directory, session_id, tx, floor, ceiling, max_retries).await;
        });

        Self { rx, task }
    }

    /// Next event, if any is ready. Never blocks.
    pub fn try_next(&mut self) -> Option<BridgeEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next event. `None` once the bridge has shut down.
    pub async fn next(&mut self) -> Option<BridgeEvent> {
        self.rx.recv().await
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_stream(
    client: Arc<AgentClient>,
    directory: String,
    session_id: String,
    tx: mpsc::Sender<BridgeEvent>,
    floor: Duration,
    ceiling: Duration,
    max_retries: u32,
) {
    let mut attempt: u32 = 0;

    loop {
        match client.open_event_stream(&directory).await {
            Ok(response) => {
                debug!(session_id = %session_id, "Event stream connected");
                attempt = 0;
                consume(response, &session_id, &tx).await;
                warn!(session_id = %session_id, "Event stream closed");
            }
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "Event stream connect failed");
            }
        }

        attempt += 1;
        if tx.send(BridgeEvent::Resync).await.is_err() {
            return; // executor is gone
        }
        if attempt > max_retries {
            warn!(session_id = %session_id, attempt, "Event stream retries exhausted");
            return;
        }

        let backoff = floor
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(ceiling);
        tokio::time::sleep(backoff).await;
    }
}

/// Read SSE frames until the connection drops, forwarding normalized events.
async fn consume(response: reqwest::Response, session_id: &str, tx: &mpsc::Sender<BridgeEvent>) {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(_) => return,
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        // SSE frames are separated by a blank line
        while let Some(frame_end) = buffer.find("\n\n") {
            let frame: String = buffer.drain(..frame_end + 2).collect();
            let Some(event) = parse_frame(&frame, session_id) else {
                continue;
            };
            let delivered = match event {
                // Lossy tick: coalesce under back-pressure
                BridgeEvent::MessagePartUpdated => {
                    let _ = tx.try_send(event);
                    true
                }
                // Must-deliver events apply back-pressure instead
                _ => tx.send(event).await.is_ok(),
            };
            if !delivered {
                return;
            }
        }
    }
}

/// Parse one SSE frame into a normalized event, filtering by session.
fn parse_frame(frame: &str, session_id: &str) -> Option<BridgeEvent> {
    let mut data = String::new();
    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data.push_str(rest.trim_start());
        }
    }
    if data.is_empty() {
        return None;
    }

    let value: Value = serde_json::from_str(&data).ok()?;
    let event_type = value.get("type").and_then(Value::as_str)?;
    let properties = value.get("properties").unwrap_or(&Value::Null);

    if event_session(properties).is_some_and(|s| s != session_id) {
        return None;
    }

    normalize(event_type)
}

/// Session id lives at different paths depending on the event kind.
fn event_session(properties: &Value) -> Option<&str> {
    properties
        .get("sessionID")
        .or_else(|| properties.get("info").and_then(|i| i.get("id")))
        .or_else(|| properties.get("info").and_then(|i| i.get("sessionID")))
        .or_else(|| properties.get("part").and_then(|p| p.get("sessionID")))
        .and_then(Value::as_str)
}

fn normalize(event_type: &str) -> Option<BridgeEvent> {
    match event_type {
        "session.updated" | "session.idle" => Some(BridgeEvent::SessionUpdated),
        "session.retry" => Some(BridgeEvent::SessionRetry),
        "permission.updated" | "permission.asked" => Some(BridgeEvent::PermissionAsked),
        "message.part.updated" => Some(BridgeEvent::MessagePartUpdated),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_known_kinds() {
        assert_eq!(normalize("session.updated"), Some(BridgeEvent::SessionUpdated));
        assert_eq!(normalize("session.retry"), Some(BridgeEvent::SessionRetry));
        assert_eq!(
            normalize("permission.updated"),
            Some(BridgeEvent::PermissionAsked)
        );
        assert_eq!(
            normalize("message.part.updated"),
            Some(BridgeEvent::MessagePartUpdated)
        );
        assert_eq!(normalize("storage.write"), None);
    }

    #[test]
    fn frame_parsing_filters_by_session() {
        let frame = "data: {\"type\":\"session.updated\",\"properties\":{\"info\":{\"id\":\"ses_1\"}}}\n\n";
        assert_eq!(parse_frame(frame, "ses_1"), Some(BridgeEvent::SessionUpdated));
        assert_eq!(parse_frame(frame, "ses_2"), None);
    }

    #[test]
    fn frame_without_session_passes_filter() {
        // Global events carry no session and are considered relevant
        let frame = "data: {\"type\":\"session.retry\",\"properties\":{}}\n\n";
        assert_eq!(parse_frame(frame, "ses_1"), Some(BridgeEvent::SessionRetry));
    }

    #[test]
    fn frame_parsing_handles_part_events() {
        let frame = "data: {\"type\":\"message.part.updated\",\"properties\":{\"part\":{\"sessionID\":\"ses_1\",\"type\":\"text\"}}}\n\n";
        assert_eq!(
            parse_frame(frame, "ses_1"),
            Some(BridgeEvent::MessagePartUpdated)
        );
    }

    #[test]
    fn garbage_frames_are_ignored() {
        assert_eq!(parse_frame(": keep-alive\n\n", "ses_1"), None);
        assert_eq!(parse_frame("data: not-json\n\n", "ses_1"), None);
        assert_eq!(parse_frame("\n\n", "ses_1"), None);
    }
}
