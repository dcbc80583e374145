//! Skill registry and router

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use super::types::{InputFileMeta, Skill};

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("unknown skill: {0}")]
    UnknownSkill(String),
}

/// Why the default skill was picked instead of the best-scoring candidate.
#[derive(Debug, Clone)]
pub struct FallbackInfo {
    pub best_code: String,
    pub best_score: f32,
    pub threshold: f32,
}

/// Resolved routing decision.
pub struct RouteOutcome {
    pub skill: Arc<dyn Skill>,
    pub fallback: Option<FallbackInfo>,
}

impl std::fmt::Debug for RouteOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteOutcome")
            .field("skill", &self.skill.descriptor().code)
            .field("fallback", &self.fallback)
            .finish()
    }
}

/// Registry mapping skill codes (and aliases) to compiled-in skills.
#[derive(Clone)]
pub struct SkillRegistry {
    skills: BTreeMap<String, Arc<dyn Skill>>,
    aliases: BTreeMap<String, String>,
    default_code: String,
}

impl SkillRegistry {
    pub fn new(default_code: impl Into<String>) -> Self {
        Self {
            skills: BTreeMap::new(),
            aliases: BTreeMap::new(),
            default_code: default_code.into(),
        }
    }

    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        let descriptor = skill.descriptor();
        for alias in descriptor.aliases {
            self.aliases
                .insert((*alias).to_string(), descriptor.code.to_string());
        }
        self.skills.insert(descriptor.code.to_string(), skill);
    }

    /// Registry with the built-in skills; `general-default` is the fallback.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new("general-default");
        registry.register(Arc::new(super::data_analysis::DataAnalysisSkill));
        registry.register(Arc::new(super::ppt::PptSkill));
        registry.register(Arc::new(super::general::GeneralSkill));
        registry
    }

    /// Resolve by code, falling back to aliases.
    pub fn get(&self, code_or_alias: &str) -> Option<Arc<dyn Skill>> {
        if let Some(skill) = self.skills.get(code_or_alias) {
            return Some(skill.clone());
        }
        self.aliases
            .get(code_or_alias)
            .and_then(|code| self.skills.get(code))
            .cloned()
    }

    pub fn default_skill(&self) -> Arc<dyn Skill> {
        self.skills
            .get(&self.default_code)
            .cloned()
            .unwrap_or_else(|| panic!("default skill {} not registered", self.default_code))
    }

    pub fn list(&self) -> Vec<Arc<dyn Skill>> {
        self.skills.values().cloned().collect()
    }

    /// Resolve which skill runs a request.
    ///
    /// An explicit code is honored or rejected; otherwise every non-default
    /// skill is scored and the argmax wins unless it falls below the
    /// threshold, in which case the default skill is selected and the
    /// shortfall is reported for the audit trail.
    pub fn route(
        &self,
        skill_code: Option<&str>,
        requirement: &str,
        files: &[InputFileMeta],
        threshold: f32,
    ) -> Result<RouteOutcome, RouterError> {
        if let Some(code) = skill_code {
            let skill = self
                .get(code)
                .ok_or_else(|| RouterError::UnknownSkill(code.to_string()))?;
            return Ok(RouteOutcome {
                skill,
                fallback: None,
            });
        }

        let mut best: Option<(Arc<dyn Skill>, f32)> = None;
        for skill in self.skills.values() {
            if skill.descriptor().code == self.default_code {
                continue;
            }
            let score = skill.score(requirement, files).clamp(0.0, 1.0);
            match &best {
                Some((_, top)) if *top >= score => {}
                _ => best = Some((skill.clone(), score)),
            }
        }

        match best {
            Some((skill, score)) if score >= threshold => Ok(RouteOutcome {
                skill,
                fallback: None,
            }),
            Some((skill, score)) => Ok(RouteOutcome {
                skill: self.default_skill(),
                fallback: Some(FallbackInfo {
                    best_code: skill.descriptor().code.to_string(),
                    best_score: score,
                    threshold,
                }),
            }),
            None => Ok(RouteOutcome {
                skill: self.default_skill(),
                fallback: Some(FallbackInfo {
                    best_code: self.default_code.clone(),
                    best_score: 0.0,
                    threshold,
                }),
            }),
        }
    }
}
