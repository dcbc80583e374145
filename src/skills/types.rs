//! Skill contract: descriptors, execution plans, and validation results

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::workspace::Workspace;

/// Identity and metadata for one registered skill.
#[derive(Debug, Clone, Serialize)]
pub struct SkillDescriptor {
    pub code: &'static str,
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub version: &'static str,
    pub schema_version: &'static str,
    pub task_type: &'static str,
    pub description: &'static str,
}

/// Metadata for one persisted upload, as seen by skills.
#[derive(Debug, Clone, Serialize)]
pub struct InputFileMeta {
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

impl InputFileMeta {
    pub fn extension(&self) -> Option<&str> {
        self.file_name.rsplit_once('.').map(|(_, ext)| ext)
    }
}

/// Everything a skill sees about one job. Skills are pure value objects:
/// they read this context and the workspace, never the store or the queue.
#[derive(Debug, Clone)]
pub struct SkillContext {
    pub job_id: String,
    pub tenant_id: String,
    pub requirement: String,
    pub workspace: Workspace,
    pub input_files: Vec<InputFileMeta>,
    pub output_contract: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub title: String,
    pub detail: String,
}

/// Structured plan written to `job/execution-plan.json` and embedded in the
/// prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub skill_code: String,
    pub schema_version: String,
    pub task_type: String,
    pub steps: Vec<PlanStep>,
    pub expected_outputs: Vec<String>,
}

/// An artifact the skill intends the agent to produce.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactSpec {
    pub relative_path: String,
    pub description: String,
    pub required: bool,
}

/// Output-contract violation reported by `validate_outputs`.
#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct Violation {
    pub reason: String,
}

impl Violation {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A pluggable strategy turning a request into a plan, a prompt, and an
/// output validator.
#[async_trait]
pub trait Skill: Send + Sync {
    fn descriptor(&self) -> &SkillDescriptor;

    /// Relevance of this skill for the request, in `[0, 1]`.
    fn score(&self, requirement: &str, files: &[InputFileMeta]) -> f32;

    fn build_execution_plan(&self, ctx: &SkillContext) -> ExecutionPlan;

    fn build_prompt(&self, ctx: &SkillContext, plan: &ExecutionPlan) -> String;

    /// Check the produced outputs against the skill's contract.
    async fn validate_outputs(&self, ctx: &SkillContext) -> Result<(), Violation>;

    fn artifact_manifest(&self, ctx: &SkillContext) -> Vec<ArtifactSpec>;
}

/// Accumulate keyword weights over a lowercased requirement, clamped to 1.
pub(crate) fn keyword_score(requirement: &str, keywords: &[(&str, f32)]) -> f32 {
    let lowered = requirement.to_lowercase();
    let mut score = 0.0;
    for (keyword, weight) in keywords {
        if lowered.contains(keyword) {
            score += weight;
        }
    }
    score.min(1.0)
}

/// Extension boost: applied once if any input matches.
pub(crate) fn extension_boost(files: &[InputFileMeta], extensions: &[&str], boost: f32) -> f32 {
    let matched = files.iter().any(|f| {
        f.extension()
            .map(|ext| extensions.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false)
    });
    if matched { boost } else { 0.0 }
}

/// Shared prompt preamble: workspace layout, inputs, and the rules every
/// skill imposes on the agent.
pub(crate) fn prompt_preamble(ctx: &SkillContext, plan: &ExecutionPlan) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "You are working inside the workspace directory `{}`.\n\n",
        ctx.workspace.root().display()
    ));
    out.push_str("## Request\n\n");
    out.push_str(ctx.requirement.trim());
    out.push_str("\n\nThe full request text is in `job/request.md`.\n\n");

    out.push_str("## Input files (read-only)\n\n");
    if ctx.input_files.is_empty() {
        out.push_str("(none)\n");
    } else {
        for file in &ctx.input_files {
            out.push_str(&format!(
                "- `inputs/{}` ({}, {} bytes)\n",
                file.file_name, file.mime_type, file.size_bytes
            ));
        }
    }

    out.push_str("\n## Plan\n\n");
    out.push_str("The execution plan is in `job/execution-plan.json`:\n");
    for step in &plan.steps {
        out.push_str(&format!("{}. {}: {}\n", step.id, step.title, step.detail));
    }

    if let Some(contract) = &ctx.output_contract {
        out.push_str("\n## Output contract\n\n");
        out.push_str("The result must satisfy this structured contract:\n```json\n");
        out.push_str(&serde_json::to_string_pretty(contract).unwrap_or_default());
        out.push_str("\n```\n");
    }

    out.push_str(
        "\n## Rules\n\n\
         - Files under `inputs/` are read-only. Never modify or delete them.\n\
         - Every deliverable must be written under `outputs/`.\n\
         - Work only inside the workspace directory.\n",
    );
    out
}

/// Names of regular files under `outputs/`, relative to it.
pub(crate) async fn list_outputs(workspace: &Workspace) -> Vec<String> {
    let outputs_dir = workspace.outputs_dir();
    tokio::task::spawn_blocking(move || {
        walkdir::WalkDir::new(&outputs_dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                e.path()
                    .strip_prefix(&outputs_dir)
                    .ok()
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
            })
            .collect()
    })
    .await
    .unwrap_or_default()
}

/// True when any listed output has one of the given extensions.
pub(crate) fn any_with_extension(outputs: &[String], extensions: &[&str]) -> bool {
    outputs.iter().any(|name| {
        name.rsplit_once('.')
            .map(|(_, ext)| extensions.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str) -> InputFileMeta {
        InputFileMeta {
            file_name: name.to_string(),
            mime_type: "application/octet-stream".to_string(),
            size_bytes: 1,
        }
    }

    #[test]
    fn keyword_score_accumulates_and_clamps() {
        let keywords = [("data", 0.6f32), ("report", 0.6f32)];
        assert_eq!(keyword_score("no match here", &keywords), 0.0);
        assert!((keyword_score("a data thing", &keywords) - 0.6).abs() < 1e-6);
        assert_eq!(keyword_score("Data Report", &keywords), 1.0);
    }

    #[test]
    fn extension_boost_applies_once() {
        let files = vec![meta("a.csv"), meta("b.CSV")];
        assert!((extension_boost(&files, &["csv"], 0.3) - 0.3).abs() < 1e-6);
        assert_eq!(extension_boost(&files, &["pptx"], 0.3), 0.0);
        assert_eq!(extension_boost(&[], &["csv"], 0.3), 0.0);
    }

    #[test]
    fn extension_matching_on_outputs() {
        let outputs = vec!["report.md".to_string(), "charts/trend.PNG".to_string()];
        assert!(any_with_extension(&outputs, &["md"]));
        assert!(any_with_extension(&outputs, &["png"]));
        assert!(!any_with_extension(&outputs, &["pptx"]));
    }
}
