//! Retention: terminal jobs past their TTL are removed together with every
//! owned record and the on-disk workspace.

use chrono::{Duration, Utc};
use tracing::{info, warn};

use super::error::Result;
use super::store::JobStore;

#[derive(Debug, Default, Clone)]
pub struct PruneStats {
    pub jobs_removed: usize,
    pub workspaces_removed: usize,
}

impl JobStore {
    /// Remove terminal jobs whose last update is older than `ttl_days`.
    /// Non-terminal jobs are never touched regardless of age.
    pub fn prune_expired(&self, ttl_days: u32) -> Result<PruneStats> {
        let cutoff = Utc::now() - Duration::days(i64::from(ttl_days));
        let mut stats = PruneStats::default();

        for job in self.all_jobs()? {
            if !job.status.is_terminal() || job.updated_at > cutoff {
                continue;
            }

            self.delete_job_cascade(&job.job_id)?;
            stats.jobs_removed += 1;

            let workspace = std::path::Path::new(&job.workspace_dir);
            if workspace.exists() {
                match std::fs::remove_dir_all(workspace) {
                    Ok(()) => stats.workspaces_removed += 1,
                    Err(err) => {
                        warn!(job_id = %job.job_id, error = %err, "Failed to remove workspace")
                    }
                }
            }
        }

        if stats.jobs_removed > 0 {
            info!(
                jobs = stats.jobs_removed,
                workspaces = stats.workspaces_removed,
                "Pruned expired jobs"
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::records::{EventSource, Job, JobEvent, JobStatus};
    use serde_json::json;
    use tempfile::TempDir;

    fn aged_job(job_id: &str, status: JobStatus, days_old: i64, workspace: &str) -> Job {
        let stamp = Utc::now() - Duration::days(days_old);
        Job {
            job_id: job_id.to_string(),
            tenant_id: "t1".to_string(),
            created_by: "tester".to_string(),
            requirement: "old".to_string(),
            selected_skill: "general-default".to_string(),
            agent: "build".to_string(),
            model: None,
            output_contract: None,
            status,
            session_id: None,
            workspace_dir: workspace.to_string(),
            result_bundle_path: None,
            error_code: None,
            error_message: None,
            created_at: stamp,
            updated_at: stamp,
        }
    }

    #[test]
    fn removes_only_expired_terminal_jobs() {
        let temp_dir = TempDir::new().unwrap();
        let store = JobStore::open(temp_dir.path().join("ledger")).unwrap();

        let old_ws = temp_dir.path().join("ws-old");
        std::fs::create_dir_all(&old_ws).unwrap();

        store
            .create_job(&aged_job(
                "old-done",
                JobStatus::Succeeded,
                60,
                old_ws.to_str().unwrap(),
            ))
            .unwrap();
        store
            .create_job(&aged_job("old-running", JobStatus::Running, 60, "/nonexistent"))
            .unwrap();
        store
            .create_job(&aged_job("fresh-done", JobStatus::Failed, 1, "/nonexistent"))
            .unwrap();
        store
            .append_event(JobEvent::new(
                "old-done",
                None,
                EventSource::Worker,
                "job.succeeded",
                "",
                json!({}),
            ))
            .unwrap();

        let stats = store.prune_expired(30).unwrap();
        assert_eq!(stats.jobs_removed, 1);
        assert_eq!(stats.workspaces_removed, 1);

        assert!(store.get("old-done").unwrap().is_none());
        assert!(store.events_since("old-done", 0, 10).unwrap().is_empty());
        assert!(!old_ws.exists());

        // A stuck running job is never pruned
        assert!(store.get("old-running").unwrap().is_some());
        assert!(store.get("fresh-done").unwrap().is_some());
    }
}
