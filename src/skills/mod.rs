//! Pluggable skills
//!
//! A skill turns a request into an execution plan, a prompt, and an output
//! validator. Skills are compiled in and registered at startup; the router
//! resolves explicit codes (or aliases) and otherwise scores every
//! non-default skill, falling back below the configured threshold.

mod data_analysis;
mod general;
mod ppt;
mod registry;
pub(crate) mod types;

pub use data_analysis::DataAnalysisSkill;
pub use general::GeneralSkill;
pub use ppt::PptSkill;
pub use registry::{FallbackInfo, RouteOutcome, RouterError, SkillRegistry};
pub use types::{
    ArtifactSpec, ExecutionPlan, InputFileMeta, PlanStep, Skill, SkillContext, SkillDescriptor,
    Violation,
};
