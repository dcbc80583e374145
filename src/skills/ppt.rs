//! Slide-deck skill

use async_trait::async_trait;

use super::types::{
    ArtifactSpec, ExecutionPlan, InputFileMeta, PlanStep, Skill, SkillContext, SkillDescriptor,
    Violation, any_with_extension, extension_boost, keyword_score, list_outputs, prompt_preamble,
};

const DESCRIPTOR: SkillDescriptor = SkillDescriptor {
    code: "ppt",
    name: "Presentation Builder",
    aliases: &["slides", "powerpoint", "presentation"],
    version: "1.0.0",
    schema_version: "v1",
    task_type: "presentation",
    description: "Turn a request and supporting material into a slide deck",
};

const KEYWORDS: &[(&str, f32)] = &[
    ("powerpoint", 0.4),
    ("ppt", 0.4),
    ("slide", 0.35),
    ("presentation", 0.35),
    ("deck", 0.3),
    ("keynote", 0.3),
    ("pitch", 0.2),
];

const MEDIA_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg"];
const DECK_EXTENSIONS: &[&str] = &["pptx", "md", "html", "pdf"];

#[derive(Debug, Default)]
pub struct PptSkill;

#[async_trait]
impl Skill for PptSkill {
    fn descriptor(&self) -> &SkillDescriptor {
        &DESCRIPTOR
    }

    fn score(&self, requirement: &str, files: &[InputFileMeta]) -> f32 {
        let score =
            keyword_score(requirement, KEYWORDS) + extension_boost(files, MEDIA_EXTENSIONS, 0.1);
        score.min(1.0)
    }

    fn build_execution_plan(&self, ctx: &SkillContext) -> ExecutionPlan {
        ExecutionPlan {
            skill_code: DESCRIPTOR.code.to_string(),
            schema_version: DESCRIPTOR.schema_version.to_string(),
            task_type: DESCRIPTOR.task_type.to_string(),
            steps: vec![
                PlanStep {
                    id: "1".to_string(),
                    title: "Review material".to_string(),
                    detail: format!(
                        "Read the request and the {} supporting file(s) under inputs/",
                        ctx.input_files.len()
                    ),
                },
                PlanStep {
                    id: "2".to_string(),
                    title: "Outline".to_string(),
                    detail: "Draft a slide outline: title, agenda, one idea per slide, closing"
                        .to_string(),
                },
                PlanStep {
                    id: "3".to_string(),
                    title: "Build deck".to_string(),
                    detail: "Produce outputs/slides.pptx (or outputs/slides.md when a pptx \
                             toolchain is unavailable), embedding supplied media"
                        .to_string(),
                },
            ],
            expected_outputs: vec!["outputs/slides.pptx".to_string()],
        }
    }

    fn build_prompt(&self, ctx: &SkillContext, plan: &ExecutionPlan) -> String {
        let mut prompt = prompt_preamble(ctx, plan);
        prompt.push_str(
            "\n## Deliverable\n\n\
             Build the deck as `outputs/slides.pptx`; fall back to `outputs/slides.md` with \
             one `---`-separated section per slide if pptx generation is impossible. Copy any \
             images you use into `outputs/`.\n",
        );
        prompt
    }

    async fn validate_outputs(&self, ctx: &SkillContext) -> Result<(), Violation> {
        let outputs = list_outputs(&ctx.workspace).await;
        if any_with_extension(&outputs, DECK_EXTENSIONS) {
            Ok(())
        } else {
            Err(Violation::new(
                "expected a deck file (pptx, md, html, or pdf) under outputs/",
            ))
        }
    }

    fn artifact_manifest(&self, _ctx: &SkillContext) -> Vec<ArtifactSpec> {
        vec![
            ArtifactSpec {
                relative_path: "outputs/slides.pptx".to_string(),
                description: "Slide deck".to_string(),
                required: true,
            },
            ArtifactSpec {
                relative_path: "outputs/slides.md".to_string(),
                description: "Markdown fallback deck".to_string(),
                required: false,
            },
        ]
    }
}
