//! Default skill: the catch-all used when no specialist scores high enough

use async_trait::async_trait;

use super::types::{
    ArtifactSpec, ExecutionPlan, InputFileMeta, PlanStep, Skill, SkillContext, SkillDescriptor,
    Violation, list_outputs, prompt_preamble,
};

const DESCRIPTOR: SkillDescriptor = SkillDescriptor {
    code: "general-default",
    name: "General Assistant",
    aliases: &["general", "default"],
    version: "1.0.0",
    schema_version: "v1",
    task_type: "general",
    description: "Fulfill an arbitrary request using the uploaded material",
};

#[derive(Debug, Default)]
pub struct GeneralSkill;

#[async_trait]
impl Skill for GeneralSkill {
    fn descriptor(&self) -> &SkillDescriptor {
        &DESCRIPTOR
    }

    /// The router never scores the default skill; it is chosen by fallback.
    fn score(&self, _requirement: &str, _files: &[InputFileMeta]) -> f32 {
        0.0
    }

    fn build_execution_plan(&self, ctx: &SkillContext) -> ExecutionPlan {
        ExecutionPlan {
            skill_code: DESCRIPTOR.code.to_string(),
            schema_version: DESCRIPTOR.schema_version.to_string(),
            task_type: DESCRIPTOR.task_type.to_string(),
            steps: vec![
                PlanStep {
                    id: "1".to_string(),
                    title: "Understand the request".to_string(),
                    detail: format!(
                        "Read job/request.md and the {} uploaded file(s) under inputs/",
                        ctx.input_files.len()
                    ),
                },
                PlanStep {
                    id: "2".to_string(),
                    title: "Produce the result".to_string(),
                    detail: "Create whatever deliverable best answers the request under outputs/"
                        .to_string(),
                },
            ],
            expected_outputs: vec!["outputs/".to_string()],
        }
    }

    fn build_prompt(&self, ctx: &SkillContext, plan: &ExecutionPlan) -> String {
        let mut prompt = prompt_preamble(ctx, plan);
        prompt.push_str(
            "\n## Deliverable\n\n\
             Decide the most useful form for the result and write it under `outputs/`. \
             A short `outputs/README.md` describing what you produced is appreciated.\n",
        );
        prompt
    }

    async fn validate_outputs(&self, ctx: &SkillContext) -> Result<(), Violation> {
        let outputs = list_outputs(&ctx.workspace).await;
        if outputs.is_empty() {
            Err(Violation::new("no files were produced under outputs/"))
        } else {
            Ok(())
        }
    }

    fn artifact_manifest(&self, _ctx: &SkillContext) -> Vec<ArtifactSpec> {
        vec![ArtifactSpec {
            relative_path: "outputs/".to_string(),
            description: "Request deliverables".to_string(),
            required: true,
        }]
    }
}
