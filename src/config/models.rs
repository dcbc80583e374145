use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// HTTP server and on-disk layout
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Root under which per-job workspaces are created
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    #[serde(default = "default_queue_path")]
    pub queue_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_root: default_data_root(),
            ledger_path: default_ledger_path(),
            queue_path: default_queue_path(),
        }
    }
}

/// External coding-agent server
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_base_url")]
    pub base_url: String,
    #[serde(default = "default_agent_username")]
    pub username: String,
    /// Loaded from environment only, never from config files
    #[serde(skip)]
    pub password: Option<String>,
    /// Agent profile requested when the job does not name one
    #[serde(default = "default_agent_name")]
    pub default_agent: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: default_agent_base_url(),
            username: default_agent_username(),
            password: None,
            default_agent: default_agent_name(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Upload caps and execution deadlines
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: ByteSize,
    #[serde(default = "default_soft_deadline_secs")]
    pub soft_deadline_secs: u64,
    #[serde(default = "default_hard_deadline_secs")]
    pub hard_deadline_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_permission_wait_secs")]
    pub permission_wait_secs: u64,
    #[serde(default = "default_event_backoff_floor_secs")]
    pub event_backoff_floor_secs: u64,
    #[serde(default = "default_event_backoff_ceiling_secs")]
    pub event_backoff_ceiling_secs: u64,
    #[serde(default = "default_event_max_retries")]
    pub event_max_retries: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            soft_deadline_secs: default_soft_deadline_secs(),
            hard_deadline_secs: default_hard_deadline_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            permission_wait_secs: default_permission_wait_secs(),
            event_backoff_floor_secs: default_event_backoff_floor_secs(),
            event_backoff_ceiling_secs: default_event_backoff_ceiling_secs(),
            event_max_retries: default_event_max_retries(),
        }
    }
}

/// Worker pool sizing and retry policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
    /// Session-creation transport failures are retried this many times
    #[serde(default = "default_session_create_retries")]
    pub session_create_retries: u32,
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: Vec<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            channel_size: default_channel_size(),
            session_create_retries: default_session_create_retries(),
            retry_backoff_secs: default_retry_backoff_secs(),
        }
    }
}

/// Skill router tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterConfig {
    #[serde(default = "default_fallback_threshold")]
    pub fallback_threshold: f32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            fallback_threshold: default_fallback_threshold(),
        }
    }
}

/// Terminal-job retention
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_job_ttl_days")]
    pub job_ttl_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            job_ttl_days: default_job_ttl_days(),
        }
    }
}

/// Fallback identifiers stamped on records when the request carries none
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentityConfig {
    #[serde(default = "default_tenant")]
    pub default_tenant: String,
    #[serde(default = "default_actor")]
    pub default_actor: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            default_tenant: default_tenant(),
            default_actor: default_actor(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data/jobs")
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/ledger")
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("data/queue")
}

fn default_agent_base_url() -> String {
    "http://127.0.0.1:4096".to_string()
}

fn default_agent_username() -> String {
    "opencode".to_string()
}

fn default_agent_name() -> String {
    "build".to_string()
}

pub(crate) fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_upload_bytes() -> ByteSize {
    ByteSize(50 * 1024 * 1024)
}

pub(crate) fn default_soft_deadline_secs() -> u64 {
    900
}

pub(crate) fn default_hard_deadline_secs() -> u64 {
    1200
}

pub(crate) fn default_poll_interval_ms() -> u64 {
    2000
}

pub(crate) fn default_permission_wait_secs() -> u64 {
    120
}

pub(crate) fn default_event_backoff_floor_secs() -> u64 {
    1
}

pub(crate) fn default_event_backoff_ceiling_secs() -> u64 {
    16
}

pub(crate) fn default_event_max_retries() -> u32 {
    5
}

pub(crate) fn default_workers() -> usize {
    4
}

pub(crate) fn default_channel_size() -> usize {
    100
}

fn default_session_create_retries() -> u32 {
    2
}

fn default_retry_backoff_secs() -> Vec<u64> {
    vec![30, 120]
}

pub(crate) fn default_fallback_threshold() -> f32 {
    0.45
}

pub(crate) fn default_job_ttl_days() -> u32 {
    30
}

fn default_tenant() -> String {
    "default".to_string()
}

fn default_actor() -> String {
    "system".to_string()
}
