use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::action::ActionCategory;
use crate::condition::{satisfies, Condition, ConditionOp};
use crate::error::ValidationError;
use crate::state::{FieldValue, WorldState};

/// A named target condition set for the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub name: String,
    pub description: String,
    pub conditions: Vec<Condition>,
    pub priority: f64,
    /// Optional whitelist: plans for this goal may only use these categories.
    pub allowed_categories: Option<Vec<ActionCategory>>,
    /// Optional wall-clock budget for executing the plan, in seconds.
    pub deadline_budget_secs: Option<u64>,
}

impl Goal {
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> GoalBuilder {
        GoalBuilder::new(id, name)
    }

    pub fn is_satisfied(&self, state: &WorldState) -> bool {
        satisfies(state, &self.conditions)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        if self.conditions.is_empty() {
            return Err(ValidationError::EmptyGoal(self.id.clone()));
        }
        for condition in &self.conditions {
            condition.validate()?;
        }
        Ok(())
    }
}

/// Fluent construction for goals; `build` validates conditions against the
/// state schema.
pub struct GoalBuilder {
    goal: Goal,
}

impl GoalBuilder {
    fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            goal: Goal {
                id: id.into(),
                name: name.into(),
                description: String::new(),
                conditions: Vec::new(),
                priority: 0.5,
                allowed_categories: None,
                deadline_budget_secs: None,
            },
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.goal.description = description.into();
        self
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.goal.conditions.push(condition);
        self
    }

    pub fn priority(mut self, priority: f64) -> Self {
        self.goal.priority = priority;
        self
    }

    pub fn allowed_categories(mut self, categories: Vec<ActionCategory>) -> Self {
        self.goal.allowed_categories = Some(categories);
        self
    }

    pub fn deadline_budget_secs(mut self, secs: u64) -> Self {
        self.goal.deadline_budget_secs = Some(secs);
        self
    }

    pub fn build(self) -> Result<Goal, ValidationError> {
        self.goal.validate()?;
        Ok(self.goal)
    }
}

/// Threshold overrides and appended requirements for deriving a customized
/// goal from a registered one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoalCustomization {
    pub min_line_coverage: Option<f64>,
    pub min_security_score: Option<f64>,
    pub min_performance_score: Option<f64>,
    pub min_tests_passing: Option<f64>,
    /// Free-form requirement tokens; each becomes a membership condition on
    /// `context.requirements`.
    pub requirements: Vec<String>,
    pub priority: Option<f64>,
}

impl GoalCustomization {
    fn threshold_overrides(&self) -> Vec<(&'static str, f64)> {
        let mut overrides = Vec::new();
        if let Some(v) = self.min_line_coverage {
            overrides.push(("coverage.line", v));
        }
        if let Some(v) = self.min_security_score {
            overrides.push(("quality.security_score", v));
        }
        if let Some(v) = self.min_performance_score {
            overrides.push(("quality.performance_score", v));
        }
        if let Some(v) = self.min_tests_passing {
            overrides.push(("quality.tests_passing", v));
        }
        overrides
    }
}

/// Keyed goal catalog with idempotent registration and customization.
#[derive(Debug, Clone, Default)]
pub struct GoalRegistry {
    goals: BTreeMap<String, Arc<Goal>>,
}

impl GoalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_goals() -> Self {
        let mut registry = Self::new();
        for goal in default_goals() {
            let _ = registry.register(goal);
        }
        registry
    }

    pub fn register(&mut self, goal: Goal) -> Result<(), ValidationError> {
        if self.goals.contains_key(&goal.id) {
            return Ok(());
        }
        goal.validate()?;
        self.goals.insert(goal.id.clone(), Arc::new(goal));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Goal>> {
        self.goals.get(id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Goal>> {
        self.goals.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.goals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    /// Derive a customized goal: numeric `gte` bounds are replaced (or added
    /// when the base goal lacks them) and each requirement token becomes a
    /// membership condition on `context.requirements`.
    pub fn customize(
        &self,
        goal_id: &str,
        customization: &GoalCustomization,
    ) -> Option<Result<Goal, ValidationError>> {
        let base = self.goals.get(goal_id)?;
        let mut goal = (**base).clone();
        goal.id = format!("{}-custom", base.id);
        goal.name = format!("{} (customized)", base.name);

        for (field, bound) in customization.threshold_overrides() {
            let existing = goal
                .conditions
                .iter_mut()
                .find(|c| c.field == field && matches!(c.op, ConditionOp::Gte(_)));
            match existing {
                Some(condition) => condition.op = ConditionOp::Gte(bound),
                None => goal.conditions.push(Condition::gte(field, bound)),
            }
        }

        for requirement in &customization.requirements {
            goal.conditions.push(Condition::contains(
                "context.requirements",
                vec![FieldValue::Text(requirement.clone())],
            ));
        }

        if let Some(priority) = customization.priority {
            goal.priority = priority;
        }

        Some(goal.validate().map(|_| goal))
    }
}

/// The default goal catalog.
pub fn default_goals() -> Vec<Goal> {
    vec![
        Goal::builder("coverage-target", "Coverage Target")
            .description("Measured coverage at or above the configured target")
            .condition(Condition::flag_is("coverage.measured", true))
            .condition(Condition::gte("coverage.line", 80.0))
            .priority(0.8)
            .build()
            .expect("default goal"),
        Goal::builder("quality-gate-passed", "Quality Gate Passed")
            .description("The quality gate evaluated and passed")
            .condition(Condition::flag_is("quality.gate_evaluated", true))
            .condition(Condition::text_is("quality.gate_status", "passed"))
            .priority(0.9)
            .build()
            .expect("default goal"),
        Goal::builder("security-hardened", "Security Hardened")
            .description("Security scanned and remediated to a safe score")
            .condition(Condition::flag_is("quality.security_measured", true))
            .condition(Condition::gte("quality.security_score", 85.0))
            .priority(0.85)
            .allowed_categories(vec![ActionCategory::Security])
            .build()
            .expect("default goal"),
        Goal::builder("performance-validated", "Performance Validated")
            .description("Performance baselined and within budget")
            .condition(Condition::flag_is("quality.performance_measured", true))
            .condition(Condition::gte("quality.performance_score", 80.0))
            .priority(0.75)
            .build()
            .expect("default goal"),
        Goal::builder("release-ready", "Release Ready")
            .description("Full pre-release quality bar")
            .condition(Condition::flag_is("coverage.measured", true))
            .condition(Condition::gte("coverage.line", 80.0))
            .condition(Condition::flag_is("quality.tests_measured", true))
            .condition(Condition::gte("quality.tests_passing", 95.0))
            .condition(Condition::flag_is("quality.security_measured", true))
            .condition(Condition::gte("quality.security_score", 85.0))
            .condition(Condition::text_is("quality.gate_status", "passed"))
            .priority(1.0)
            .deadline_budget_secs(7200)
            .build()
            .expect("default goal"),
        Goal::builder("fleet-optimized", "Fleet Optimized")
            .description("Fleet topology tuned for the current workload")
            .condition(Condition::flag_is("fleet.topology_optimized", true))
            .priority(0.4)
            .allowed_categories(vec![ActionCategory::Fleet])
            .build()
            .expect("default goal"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_goals_validate() {
        let registry = GoalRegistry::with_default_goals();
        assert_eq!(registry.len(), 6);
        assert!(registry.get("release-ready").is_some());
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = GoalRegistry::with_default_goals();
        let replacement = Goal::builder("coverage-target", "Other")
            .condition(Condition::gte("coverage.line", 10.0))
            .build()
            .unwrap();
        registry.register(replacement).unwrap();
        assert_eq!(registry.get("coverage-target").unwrap().name, "Coverage Target");
    }

    #[test]
    fn test_goal_requires_conditions() {
        let err = Goal::builder("empty", "Empty").build().unwrap_err();
        assert_eq!(err, ValidationError::EmptyGoal("empty".to_string()));
    }

    #[test]
    fn test_goal_satisfaction() {
        let registry = GoalRegistry::with_default_goals();
        let goal = registry.get("coverage-target").unwrap();

        let mut state = WorldState::default();
        assert!(!goal.is_satisfied(&state));

        state.coverage.measured = true;
        state.coverage.line = 85.0;
        assert!(goal.is_satisfied(&state));
    }

    #[test]
    fn test_customize_replaces_threshold() {
        let registry = GoalRegistry::with_default_goals();
        let customization = GoalCustomization {
            min_line_coverage: Some(90.0),
            ..Default::default()
        };
        let goal = registry
            .customize("coverage-target", &customization)
            .unwrap()
            .unwrap();

        assert_eq!(goal.id, "coverage-target-custom");
        let bound = goal
            .conditions
            .iter()
            .find_map(|c| match (&c.field[..], &c.op) {
                ("coverage.line", ConditionOp::Gte(bound)) => Some(*bound),
                _ => None,
            })
            .unwrap();
        assert_eq!(bound, 90.0);
        // Only one coverage.line bound remains after the override.
        let count = goal
            .conditions
            .iter()
            .filter(|c| c.field == "coverage.line")
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_customize_appends_requirements() {
        let registry = GoalRegistry::with_default_goals();
        let customization = GoalCustomization {
            requirements: vec!["audit-trail".to_string()],
            ..Default::default()
        };
        let goal = registry
            .customize("quality-gate-passed", &customization)
            .unwrap()
            .unwrap();

        let mut state = WorldState::default();
        state.quality.gate_evaluated = true;
        state.quality.gate_status = crate::state::GateStatus::Passed;
        assert!(!goal.is_satisfied(&state));

        state.context.requirements.push("audit-trail".to_string());
        assert!(goal.is_satisfied(&state));
    }

    #[test]
    fn test_customize_unknown_goal() {
        let registry = GoalRegistry::with_default_goals();
        assert!(registry
            .customize("no-such-goal", &GoalCustomization::default())
            .is_none());
    }
}
