//! Configuration management
//!
//! Layered loading: struct defaults, then a TOML file, then environment
//! variables with the pattern `AGENTBOX__<SECTION>__<KEY>` (e.g.
//! `AGENTBOX__SERVER__BIND_ADDR=0.0.0.0:9000`). The file location defaults
//! to `config/agentbox.toml` and can be moved with `AGENTBOX_CONFIG`.
//!
//! Agent credentials are environment-only (`AGENTBOX_AGENT_PASSWORD`).
//!
//! Out-of-range numeric values (zero deadlines, zero workers, a fallback
//! threshold outside (0, 1]) are replaced by the documented defaults rather
//! than failing startup.

mod models;
mod sources;

pub use crate::humanize::ByteSize;
pub use models::{
    AgentConfig, Config, IdentityConfig, LimitsConfig, QueueConfig, RetentionConfig, RouterConfig,
    ServerConfig,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

impl Config {
    /// Load configuration from all sources (file + environment).
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = sources::load()?;
        normalize(&mut config);
        Ok(config)
    }

    /// Load configuration from a specific path. Useful for tests.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let mut config = sources::load_from_sources(path)?;
        normalize(&mut config);
        Ok(config)
    }
}

/// Replace invalid numeric settings with their documented defaults.
fn normalize(config: &mut Config) {
    let limits = &mut config.limits;
    if limits.soft_deadline_secs == 0 {
        reset(
            "limits.soft_deadline_secs",
            &mut limits.soft_deadline_secs,
            models::default_soft_deadline_secs(),
        );
    }
    if limits.hard_deadline_secs == 0 {
        reset(
            "limits.hard_deadline_secs",
            &mut limits.hard_deadline_secs,
            models::default_hard_deadline_secs(),
        );
    }
    if limits.hard_deadline_secs < limits.soft_deadline_secs {
        reset(
            "limits.hard_deadline_secs",
            &mut limits.hard_deadline_secs,
            limits.soft_deadline_secs,
        );
    }
    if limits.poll_interval_ms == 0 {
        reset(
            "limits.poll_interval_ms",
            &mut limits.poll_interval_ms,
            models::default_poll_interval_ms(),
        );
    }
    if limits.permission_wait_secs == 0 {
        reset(
            "limits.permission_wait_secs",
            &mut limits.permission_wait_secs,
            models::default_permission_wait_secs(),
        );
    }
    if limits.event_backoff_floor_secs == 0 {
        reset(
            "limits.event_backoff_floor_secs",
            &mut limits.event_backoff_floor_secs,
            models::default_event_backoff_floor_secs(),
        );
    }
    if limits.event_backoff_ceiling_secs < limits.event_backoff_floor_secs {
        reset(
            "limits.event_backoff_ceiling_secs",
            &mut limits.event_backoff_ceiling_secs,
            models::default_event_backoff_ceiling_secs(),
        );
    }
    if limits.event_max_retries == 0 {
        reset(
            "limits.event_max_retries",
            &mut limits.event_max_retries,
            models::default_event_max_retries(),
        );
    }

    if config.agent.request_timeout_secs == 0 {
        reset(
            "agent.request_timeout_secs",
            &mut config.agent.request_timeout_secs,
            models::default_request_timeout_secs(),
        );
    }

    if config.queue.workers == 0 {
        reset(
            "queue.workers",
            &mut config.queue.workers,
            models::default_workers(),
        );
    }
    if config.queue.channel_size == 0 {
        reset(
            "queue.channel_size",
            &mut config.queue.channel_size,
            models::default_channel_size(),
        );
    }

    let threshold = config.router.fallback_threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
        reset(
            "router.fallback_threshold",
            &mut config.router.fallback_threshold,
            models::default_fallback_threshold(),
        );
    }

    if config.retention.job_ttl_days == 0 {
        reset(
            "retention.job_ttl_days",
            &mut config.retention.job_ttl_days,
            models::default_job_ttl_days(),
        );
    }
}

fn reset<T: Copy + std::fmt::Debug>(key: &str, slot: &mut T, fallback: T) {
    tracing::warn!(key, ?fallback, "Invalid config value, using default");
    *slot = fallback;
}
