use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::condition::Condition;
use crate::effect::{Effect, EffectOp};
use crate::error::ValidationError;

/// Broad action category used for goal whitelists and workflow step typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    Test,
    Security,
    Performance,
    Process,
    Fleet,
    Analysis,
}

impl ActionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionCategory::Test => "test",
            ActionCategory::Security => "security",
            ActionCategory::Performance => "performance",
            ActionCategory::Process => "process",
            ActionCategory::Fleet => "fleet",
            ActionCategory::Analysis => "analysis",
        }
    }
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered unit of work: preconditions gate applicability, effects
/// describe the symbolic outcome, cost is seconds-scale and feeds both the
/// A* search and the resource budget.
///
/// Actions are immutable after registration; identity is `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Executor type token this action dispatches to.
    pub agent_type: String,
    pub category: ActionCategory,
    pub preconditions: Vec<Condition>,
    pub effects: Vec<Effect>,
    pub cost: f64,
    pub duration_estimate_ms: u64,
    pub success_rate: f64,
}

impl Action {
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> ActionBuilder {
        ActionBuilder::new(id, name)
    }

    /// Whether any effect sets a measurement flag. Such actions are treated
    /// as mandatory by the alternative-plan search.
    pub fn sets_measurement_flag(&self) -> bool {
        self.effects.iter().any(|effect| {
            effect.sets_flag() && crate::state::is_measurement_flag(&effect.field)
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        if self.cost <= 0.0 || !self.cost.is_finite() {
            return Err(ValidationError::NonPositiveCost {
                id: self.id.clone(),
                cost: self.cost,
            });
        }
        if !(0.0..=1.0).contains(&self.success_rate) {
            return Err(ValidationError::SuccessRateOutOfRange {
                id: self.id.clone(),
                rate: self.success_rate,
            });
        }
        if self.effects.is_empty() {
            return Err(ValidationError::EmptyEffects(self.id.clone()));
        }
        for condition in &self.preconditions {
            condition.validate()?;
        }
        for effect in &self.effects {
            effect.validate()?;
        }
        Ok(())
    }
}

/// Fluent construction for actions; `build` runs full schema validation.
pub struct ActionBuilder {
    action: Action,
}

impl ActionBuilder {
    fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            action: Action {
                id: id.into(),
                name: name.into(),
                description: String::new(),
                agent_type: String::new(),
                category: ActionCategory::Process,
                preconditions: Vec::new(),
                effects: Vec::new(),
                cost: 1.0,
                duration_estimate_ms: 60_000,
                success_rate: 0.95,
            },
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.action.description = description.into();
        self
    }

    pub fn agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.action.agent_type = agent_type.into();
        self
    }

    pub fn category(mut self, category: ActionCategory) -> Self {
        self.action.category = category;
        self
    }

    pub fn precondition(mut self, condition: Condition) -> Self {
        self.action.preconditions.push(condition);
        self
    }

    pub fn effect(mut self, effect: Effect) -> Self {
        self.action.effects.push(effect);
        self
    }

    pub fn cost(mut self, cost: f64) -> Self {
        self.action.cost = cost;
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.action.duration_estimate_ms = duration_ms;
        self
    }

    pub fn success_rate(mut self, success_rate: f64) -> Self {
        self.action.success_rate = success_rate;
        self
    }

    pub fn build(self) -> Result<Action, ValidationError> {
        self.action.validate()?;
        Ok(self.action)
    }
}

/// Keyed catalog of registered actions.
///
/// Registration is idempotent on id (re-registering an id is a no-op, never a
/// replace) and validates every condition and effect against the state
/// schema. Lookups are total and iterate in stable id order, which the
/// planner relies on for deterministic expansion.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    actions: BTreeMap<String, Arc<Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the default QE catalog.
    pub fn with_default_catalog() -> Self {
        let mut registry = Self::new();
        for action in default_catalog() {
            // The default catalog is schema-checked by its own tests.
            let _ = registry.register(action);
        }
        registry
    }

    pub fn register(&mut self, action: Action) -> Result<(), ValidationError> {
        if self.actions.contains_key(&action.id) {
            return Ok(());
        }
        action.validate()?;
        self.actions.insert(action.id.clone(), Arc::new(action));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Action>> {
        self.actions.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// All actions in id order.
    pub fn all(&self) -> Vec<Arc<Action>> {
        self.actions.values().cloned().collect()
    }

    pub fn by_category(&self, category: ActionCategory) -> Vec<Arc<Action>> {
        self.actions
            .values()
            .filter(|action| action.category == category)
            .cloned()
            .collect()
    }

    pub fn by_executor_type(&self, agent_type: &str) -> Vec<Arc<Action>> {
        self.actions
            .values()
            .filter(|action| action.agent_type == agent_type)
            .cloned()
            .collect()
    }

    pub fn within_cost_budget(&self, budget: f64) -> Vec<Arc<Action>> {
        self.actions
            .values()
            .filter(|action| action.cost <= budget)
            .cloned()
            .collect()
    }

    pub fn within_time_budget(&self, budget_ms: u64) -> Vec<Arc<Action>> {
        self.actions
            .values()
            .filter(|action| action.duration_estimate_ms <= budget_ms)
            .cloned()
            .collect()
    }

    pub fn at_least_success_rate(&self, rate: f64) -> Vec<Arc<Action>> {
        self.actions
            .values()
            .filter(|action| action.success_rate >= rate)
            .cloned()
            .collect()
    }

    /// Minimum cost across the catalog; the planner's admissible heuristic
    /// uses this as its cost-per-unit-progress multiplier.
    pub fn min_catalog_cost(&self) -> f64 {
        self.actions
            .values()
            .map(|action| action.cost)
            .fold(f64::INFINITY, f64::min)
    }

    /// Distinct executor-type tokens referenced by registered actions.
    pub fn agent_types(&self) -> Vec<String> {
        let types: BTreeSet<String> = self
            .actions
            .values()
            .map(|action| action.agent_type.clone())
            .collect();
        types.into_iter().collect()
    }
}

/// The default quality-engineering catalog.
///
/// Costs are wall-clock seconds so resource budgets prune meaningfully:
/// measurements are cheap, generation is mid-range, and remediation work
/// costs at least 300. Every improvement action is gated on the measurement
/// flag for its dimension.
pub fn default_catalog() -> Vec<Action> {
    let mut actions = Vec::new();

    // Measurement actions. These have no measurement preconditions of their
    // own and unlock the improvement actions below.
    actions.push(
        Action::builder("measure-coverage", "Measure Coverage")
            .description("Run instrumented suites and record line/branch/function coverage")
            .agent_type("coverage-analyzer")
            .category(ActionCategory::Analysis)
            .effect(Effect::set_flag("coverage.measured", true))
            .cost(45.0)
            .duration_ms(30_000)
            .success_rate(0.98)
            .build()
            .expect("default catalog action"),
    );
    actions.push(
        Action::builder("run-unit-tests", "Run Unit Tests")
            .description("Execute the unit suite and record pass rates")
            .agent_type("test-executor")
            .category(ActionCategory::Test)
            .effect(Effect::set_flag("quality.tests_measured", true))
            .cost(90.0)
            .duration_ms(60_000)
            .success_rate(0.95)
            .build()
            .expect("default catalog action"),
    );
    actions.push(
        Action::builder("security-scan", "Security Scan")
            .description("Static and dependency scanning for known vulnerabilities")
            .agent_type("security-scanner")
            .category(ActionCategory::Security)
            .effect(Effect::set_flag("quality.security_measured", true))
            .cost(120.0)
            .duration_ms(90_000)
            .success_rate(0.95)
            .build()
            .expect("default catalog action"),
    );
    actions.push(
        Action::builder("performance-baseline", "Performance Baseline")
            .description("Capture latency and error-rate baselines under load")
            .agent_type("performance-tester")
            .category(ActionCategory::Performance)
            .effect(Effect::set_flag("quality.performance_measured", true))
            .cost(120.0)
            .duration_ms(120_000)
            .success_rate(0.92)
            .build()
            .expect("default catalog action"),
    );
    actions.push(
        Action::builder("measure-complexity", "Measure Complexity")
            .description("Compute cyclomatic complexity and debt indicators")
            .agent_type("static-analyzer")
            .category(ActionCategory::Analysis)
            .effect(Effect::set_flag("quality.complexity_measured", true))
            .cost(60.0)
            .duration_ms(45_000)
            .success_rate(0.98)
            .build()
            .expect("default catalog action"),
    );
    actions.push(
        Action::builder("analyze-impact", "Analyze Change Impact")
            .description("Map changed files to impacted modules and test surfaces")
            .agent_type("impact-analyzer")
            .category(ActionCategory::Analysis)
            .effect(Effect::set_flag("context.impact_analyzed", true))
            .cost(45.0)
            .duration_ms(30_000)
            .success_rate(0.97)
            .build()
            .expect("default catalog action"),
    );
    actions.push(
        Action::builder("analyze-coverage-gaps", "Analyze Coverage Gaps")
            .description("Locate uncovered branches worth generating tests for")
            .agent_type("coverage-analyzer")
            .category(ActionCategory::Analysis)
            .precondition(Condition::flag_is("coverage.measured", true))
            .effect(Effect::set_flag("context.coverage_gaps_analyzed", true))
            .cost(60.0)
            .duration_ms(45_000)
            .success_rate(0.96)
            .build()
            .expect("default catalog action"),
    );

    // Improvement actions, each gated on its measurement flag.
    actions.push(
        Action::builder("generate-missing-tests", "Generate Missing Tests")
            .description("Synthesize tests for uncovered code paths")
            .agent_type("test-generator")
            .category(ActionCategory::Test)
            .precondition(Condition::flag_is("coverage.measured", true))
            .effect(Effect::increase("coverage.line", 15.0))
            .effect(Effect::increase("coverage.branch", 12.0))
            .effect(Effect::increase("coverage.function", 10.0))
            .cost(180.0)
            .duration_ms(120_000)
            .success_rate(0.9)
            .build()
            .expect("default catalog action"),
    );
    actions.push(
        Action::builder("repair-failing-tests", "Repair Failing Tests")
            .description("Diagnose and fix failing or flaky tests")
            .agent_type("test-generator")
            .category(ActionCategory::Test)
            .precondition(Condition::flag_is("quality.tests_measured", true))
            .effect(Effect::increase("quality.tests_passing", 20.0))
            .cost(150.0)
            .duration_ms(90_000)
            .success_rate(0.85)
            .build()
            .expect("default catalog action"),
    );
    actions.push(
        Action::builder("remediate-vulnerabilities", "Remediate Vulnerabilities")
            .description("Patch or upgrade away scanner findings")
            .agent_type("security-scanner")
            .category(ActionCategory::Security)
            .precondition(Condition::flag_is("quality.security_measured", true))
            .effect(Effect::increase("quality.security_score", 30.0))
            .cost(300.0)
            .duration_ms(240_000)
            .success_rate(0.8)
            .build()
            .expect("default catalog action"),
    );
    actions.push(
        Action::builder("harden-configuration", "Harden Configuration")
            .description("Tighten runtime and dependency configuration")
            .agent_type("security-scanner")
            .category(ActionCategory::Security)
            .precondition(Condition::flag_is("quality.security_measured", true))
            .effect(Effect::increase("quality.security_score", 10.0))
            .cost(320.0)
            .duration_ms(180_000)
            .success_rate(0.9)
            .build()
            .expect("default catalog action"),
    );
    actions.push(
        Action::builder("optimize-performance", "Optimize Performance")
            .description("Apply profiling-guided optimizations to hot paths")
            .agent_type("performance-tester")
            .category(ActionCategory::Performance)
            .precondition(Condition::flag_is("quality.performance_measured", true))
            .effect(Effect::increase("quality.performance_score", 20.0))
            .cost(300.0)
            .duration_ms(240_000)
            .success_rate(0.8)
            .build()
            .expect("default catalog action"),
    );
    actions.push(
        Action::builder("reduce-technical-debt", "Reduce Technical Debt")
            .description("Refactor the highest-debt modules surfaced by analysis")
            .agent_type("static-analyzer")
            .category(ActionCategory::Process)
            .precondition(Condition::flag_is("quality.complexity_measured", true))
            .effect(Effect::decrease("quality.technical_debt", 20.0))
            .cost(300.0)
            .duration_ms(300_000)
            .success_rate(0.85)
            .build()
            .expect("default catalog action"),
    );

    // Deeper test passes.
    actions.push(
        Action::builder("run-integration-tests", "Run Integration Tests")
            .description("Execute cross-module integration suites")
            .agent_type("test-executor")
            .category(ActionCategory::Test)
            .precondition(Condition::flag_is("quality.tests_measured", true))
            .effect(Effect::set_flag("quality.integration_tested", true))
            .cost(240.0)
            .duration_ms(180_000)
            .success_rate(0.9)
            .build()
            .expect("default catalog action"),
    );
    actions.push(
        Action::builder("run-smoke-tests", "Run Smoke Tests")
            .description("Fast end-to-end sanity pass over critical endpoints")
            .agent_type("test-executor")
            .category(ActionCategory::Test)
            .effect(Effect::set_flag("quality.smoke_tests_passing", true))
            .cost(60.0)
            .duration_ms(45_000)
            .success_rate(0.95)
            .build()
            .expect("default catalog action"),
    );
    actions.push(
        Action::builder("test-critical-paths", "Test Critical Paths")
            .description("Targeted tests over the impacted critical paths")
            .agent_type("test-executor")
            .category(ActionCategory::Test)
            .precondition(Condition::flag_is("context.impact_analyzed", true))
            .effect(Effect::set_flag("quality.critical_path_tested", true))
            .cost(120.0)
            .duration_ms(90_000)
            .success_rate(0.92)
            .build()
            .expect("default catalog action"),
    );
    actions.push(
        Action::builder("generate-bdd-scenarios", "Generate BDD Scenarios")
            .description("Derive behavior scenarios from the impact analysis")
            .agent_type("bdd-generator")
            .category(ActionCategory::Test)
            .precondition(Condition::flag_is("context.impact_analyzed", true))
            .effect(Effect::set_flag("context.bdd_generated", true))
            .cost(90.0)
            .duration_ms(60_000)
            .success_rate(0.9)
            .build()
            .expect("default catalog action"),
    );

    // Quality gate.
    actions.push(
        Action::builder("evaluate-quality-gate", "Evaluate Quality Gate")
            .description("Score the gate from measured quality dimensions")
            .agent_type("quality-gate")
            .category(ActionCategory::Process)
            .precondition(Condition::flag_is("quality.tests_measured", true))
            .effect(Effect::set_flag("quality.gate_evaluated", true))
            .cost(30.0)
            .duration_ms(15_000)
            .success_rate(0.99)
            .build()
            .expect("default catalog action"),
    );
    actions.push(
        Action::builder("finalize-quality-gate", "Finalize Quality Gate")
            .description("Commit the gate verdict")
            .agent_type("quality-gate")
            .category(ActionCategory::Process)
            .precondition(Condition::flag_is("quality.gate_evaluated", true))
            .effect(Effect::set_text("quality.gate_status", "passed"))
            .cost(15.0)
            .duration_ms(5_000)
            .success_rate(0.99)
            .build()
            .expect("default catalog action"),
    );
    actions.push(
        Action::builder("request-gate-exception", "Request Gate Exception")
            .description("Escalate a failed gate for a manual exception")
            .agent_type("quality-gate")
            .category(ActionCategory::Process)
            .precondition(Condition::flag_is("quality.gate_evaluated", true))
            .effect(Effect::set_text("quality.gate_status", "exception_requested"))
            .cost(20.0)
            .duration_ms(10_000)
            .success_rate(0.95)
            .build()
            .expect("default catalog action"),
    );

    // Fleet management.
    actions.push(
        Action::builder("spawn-agent", "Spawn Agent")
            .description("Bring another executor online")
            .agent_type("fleet-commander")
            .category(ActionCategory::Fleet)
            .effect(Effect::new("fleet.active_agents", EffectOp::Increment))
            .cost(30.0)
            .duration_ms(15_000)
            .success_rate(0.97)
            .build()
            .expect("default catalog action"),
    );
    actions.push(
        Action::builder("rebalance-agents", "Rebalance Agents")
            .description("Shift idle capacity toward the queued workload")
            .agent_type("fleet-commander")
            .category(ActionCategory::Fleet)
            .precondition(Condition::gte("fleet.active_agents", 1.0))
            .effect(Effect::new("resources.parallel_slots", EffectOp::Increment))
            .cost(45.0)
            .duration_ms(20_000)
            .success_rate(0.95)
            .build()
            .expect("default catalog action"),
    );
    actions.push(
        Action::builder("optimize-topology", "Optimize Topology")
            .description("Re-plan the fleet communication topology")
            .agent_type("fleet-commander")
            .category(ActionCategory::Fleet)
            .precondition(Condition::gte("fleet.active_agents", 2.0))
            .effect(Effect::set_flag("fleet.topology_optimized", true))
            .cost(60.0)
            .duration_ms(30_000)
            .success_rate(0.93)
            .build()
            .expect("default catalog action"),
    );

    actions
}
