//! Data-analysis skill: tabular inputs in, written report out

use async_trait::async_trait;

use super::types::{
    ArtifactSpec, ExecutionPlan, InputFileMeta, PlanStep, Skill, SkillContext, SkillDescriptor,
    Violation, any_with_extension, extension_boost, keyword_score, list_outputs, prompt_preamble,
};

const DESCRIPTOR: SkillDescriptor = SkillDescriptor {
    code: "data-analysis",
    name: "Data Analysis",
    aliases: &["analysis", "data"],
    version: "1.0.0",
    schema_version: "v1",
    task_type: "analysis",
    description: "Analyze tabular or structured data and produce a written report",
};

const KEYWORDS: &[(&str, f32)] = &[
    ("csv", 0.2),
    ("excel", 0.2),
    ("xlsx", 0.2),
    ("spreadsheet", 0.2),
    ("dataset", 0.2),
    ("analy", 0.2),
    ("statistic", 0.2),
    ("data", 0.15),
    ("report", 0.15),
    ("summar", 0.15),
    ("chart", 0.15),
    ("trend", 0.1),
    ("table", 0.1),
    ("sales", 0.1),
    ("metric", 0.1),
];

const DATA_EXTENSIONS: &[&str] = &["csv", "tsv", "xlsx", "xls", "json", "jsonl", "parquet"];
const REPORT_EXTENSIONS: &[&str] = &["md", "html", "csv", "xlsx", "pdf"];

#[derive(Debug, Default)]
pub struct DataAnalysisSkill;

#[async_trait]
impl Skill for DataAnalysisSkill {
    fn descriptor(&self) -> &SkillDescriptor {
        &DESCRIPTOR
    }

    fn score(&self, requirement: &str, files: &[InputFileMeta]) -> f32 {
        let score = keyword_score(requirement, KEYWORDS)
            + extension_boost(files, DATA_EXTENSIONS, 0.3);
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
                    title: "Inspect inputs".to_string(),
                    detail: format!(
                        "Read the {} uploaded file(s) under inputs/ and identify their structure",
                        ctx.input_files.len()
                    ),
                },
                PlanStep {
                    id: "2".to_string(),
                    title: "Analyze".to_string(),
                    detail: "Compute the figures the request asks for, with intermediate \
                             artifacts under outputs/ when useful"
                        .to_string(),
                },
                PlanStep {
                    id: "3".to_string(),
                    title: "Write report".to_string(),
                    detail: "Produce outputs/report.md summarizing findings, referencing any \
                             generated tables or charts"
                        .to_string(),
                },
            ],
            expected_outputs: vec!["outputs/report.md".to_string()],
        }
    }

    fn build_prompt(&self, ctx: &SkillContext, plan: &ExecutionPlan) -> String {
        let mut prompt = prompt_preamble(ctx, plan);
        prompt.push_str(
            "\n## Deliverable\n\n\
             Write an analysis report to `outputs/report.md`. Derived tables or charts \
             belong under `outputs/` next to it.\n",
        );
        prompt
    }

    async fn validate_outputs(&self, ctx: &SkillContext) -> Result<(), Violation> {
        let outputs = list_outputs(&ctx.workspace).await;
        if any_with_extension(&outputs, REPORT_EXTENSIONS) {
            Ok(())
        } else {
            Err(Violation::new(
                "expected a report file (md, html, csv, xlsx, or pdf) under outputs/",
            ))
        }
    }

    fn artifact_manifest(&self, _ctx: &SkillContext) -> Vec<ArtifactSpec> {
        vec![ArtifactSpec {
            relative_path: "outputs/report.md".to_string(),
            description: "Analysis report".to_string(),
            required: true,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str) -> InputFileMeta {
        InputFileMeta {
            file_name: name.to_string(),
            mime_type: "text/csv".to_string(),
            size_bytes: 12 * 1024,
        }
    }

    #[test]
    fn scores_high_for_tabular_analysis_requests() {
        let skill = DataAnalysisSkill;
        let score = skill.score("Summarize sales.csv into a report", &[meta("sales.csv")]);
        assert!(score >= 0.45, "score was {score}");
    }

    #[test]
    fn scores_low_for_unrelated_requests() {
        let skill = DataAnalysisSkill;
        let score = skill.score("hello", &[meta("note.txt")]);
        assert!(score < 0.45, "score was {score}");
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let skill = DataAnalysisSkill;
        let requirement = "analyze the csv excel xlsx dataset data statistics report \
                           summary chart trend table sales metrics";
        let score = skill.score(requirement, &[meta("a.csv"), meta("b.xlsx")]);
        assert!((0.0..=1.0).contains(&score));
    }
}
