use std::sync::Arc;

use crate::agent::AgentClient;
use crate::config::Config;
use crate::ledger::JobStore;
use crate::observability::Metrics;
use crate::orchestrator::Orchestrator;
use crate::skills::SkillRegistry;
use crate::workspace::WorkspaceManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<JobStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub skills: Arc<SkillRegistry>,
    pub agent: Arc<AgentClient>,
    pub workspaces: Arc<WorkspaceManager>,
    pub metrics: Arc<Metrics>,
}
