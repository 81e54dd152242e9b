use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use gauntlet_core::action::{Action, ActionCategory, ActionRegistry};

use crate::plan::Plan;

/// How the compiled workflow orders its steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStrategy {
    /// Every step depends on its predecessor.
    Sequential,
    /// Dependencies come solely from precondition/effect dataflow.
    Parallel,
    /// Like parallel, with explicit parallelism hints on root steps.
    Adaptive,
}

/// Coarse step classification for downstream schedulers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepType {
    Analysis,
    TestGeneration,
    TestExecution,
    CoverageAnalysis,
    SecurityAnalysis,
    PerformanceTesting,
    DecisionMaking,
    ResourceManagement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// One node of the compiled workflow DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub name: String,
    pub step_type: StepType,
    pub depends_on: Vec<String>,
    pub estimated_duration_ms: u64,
    pub status: StepStatus,
    pub executor_type: String,
    pub category: ActionCategory,
    pub can_run_parallel: bool,
    pub source_action_id: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("plan references unregistered action '{0}'")]
    UnknownAction(String),

    #[error("extracted dependencies form a cycle")]
    CyclicDependencies,
}

/// Compiles a linear plan into an ordered sequence of workflow steps with
/// explicit dependencies.
///
/// Dependencies are extracted from dataflow rather than hand-authored: step
/// B depends on step A when some field named in B's preconditions is set by
/// one of A's effects. This captures the measurement-before-improvement
/// discipline without bespoke DAG definitions.
pub struct WorkflowCompiler<'a> {
    registry: &'a ActionRegistry,
}

impl<'a> WorkflowCompiler<'a> {
    pub fn new(registry: &'a ActionRegistry) -> Self {
        Self { registry }
    }

    pub fn compile(
        &self,
        plan: &Plan,
        strategy: WorkflowStrategy,
    ) -> Result<Vec<WorkflowStep>, CompileError> {
        let actions = self.resolve_actions(plan)?;

        let mut steps: Vec<WorkflowStep> = Vec::with_capacity(actions.len());
        for (index, action) in actions.iter().enumerate() {
            let depends_on = match strategy {
                WorkflowStrategy::Sequential => {
                    if index == 0 {
                        Vec::new()
                    } else {
                        vec![step_id(index - 1, &actions[index - 1])]
                    }
                }
                WorkflowStrategy::Parallel | WorkflowStrategy::Adaptive => {
                    extract_dependencies(&actions, index)
                        .into_iter()
                        .map(|dep| step_id(dep, &actions[dep]))
                        .collect()
                }
            };

            let can_run_parallel =
                strategy == WorkflowStrategy::Adaptive && depends_on.is_empty();

            steps.push(WorkflowStep {
                id: step_id(index, action),
                name: action.name.clone(),
                step_type: step_type_for(action),
                depends_on,
                estimated_duration_ms: action.duration_estimate_ms,
                status: StepStatus::Pending,
                executor_type: action.agent_type.clone(),
                category: action.category,
                can_run_parallel,
                source_action_id: action.id.clone(),
            });
        }

        validate_acyclic(&steps)?;
        Ok(steps)
    }

    fn resolve_actions(&self, plan: &Plan) -> Result<Vec<std::sync::Arc<Action>>, CompileError> {
        plan.actions
            .iter()
            .map(|id| {
                self.registry
                    .get(id)
                    .ok_or_else(|| CompileError::UnknownAction(id.clone()))
            })
            .collect()
    }
}

fn step_id(index: usize, action: &Action) -> String {
    format!("step-{}-{}", index + 1, action.id)
}

/// Indices of earlier plan actions whose `set` effects produce a field named
/// in this action's preconditions.
fn extract_dependencies(actions: &[std::sync::Arc<Action>], index: usize) -> Vec<usize> {
    let mut dependencies = Vec::new();
    let consumer = &actions[index];
    for (earlier_index, producer) in actions.iter().enumerate().take(index) {
        let produces_needed_field = consumer.preconditions.iter().any(|condition| {
            producer
                .effects
                .iter()
                .any(|effect| effect.sets_field(&condition.field))
        });
        if produces_needed_field {
            dependencies.push(earlier_index);
        }
    }
    dependencies
}

fn step_type_for(action: &Action) -> StepType {
    match action.category {
        ActionCategory::Analysis => {
            if action.id.contains("coverage") {
                StepType::CoverageAnalysis
            } else {
                StepType::Analysis
            }
        }
        ActionCategory::Test => {
            if action.id.contains("generate") || action.id.contains("bdd") {
                StepType::TestGeneration
            } else {
                StepType::TestExecution
            }
        }
        ActionCategory::Security => StepType::SecurityAnalysis,
        ActionCategory::Performance => StepType::PerformanceTesting,
        ActionCategory::Process => StepType::DecisionMaking,
        ActionCategory::Fleet => StepType::ResourceManagement,
    }
}

/// Dependencies always point backwards in the linear plan, so a cycle would
/// indicate a compiler bug; validated the same way the graph is consumed.
fn validate_acyclic(steps: &[WorkflowStep]) -> Result<(), CompileError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut nodes = HashMap::new();
    for step in steps {
        nodes.insert(step.id.as_str(), graph.add_node(step.id.as_str()));
    }
    for step in steps {
        for dependency in &step.depends_on {
            if let (Some(&from), Some(&to)) =
                (nodes.get(dependency.as_str()), nodes.get(step.id.as_str()))
            {
                graph.add_edge(from, to, ());
            }
        }
    }
    if petgraph::algo::is_cyclic_directed(&graph) {
        return Err(CompileError::CyclicDependencies);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanStatus;
    use gauntlet_core::WorldState;

    fn plan_of(actions: &[&str]) -> Plan {
        Plan {
            id: "plan-1".to_string(),
            goal_id: "goal-1".to_string(),
            actions: actions.iter().map(|s| s.to_string()).collect(),
            total_cost: 0.0,
            estimated_duration_ms: 0,
            initial_state: WorldState::default(),
            goal_state: WorldState::default(),
            status: PlanStatus::Pending,
            created_at_ms: 0,
            started_at_ms: None,
            completed_at_ms: None,
        }
    }

    fn registry() -> ActionRegistry {
        ActionRegistry::with_default_catalog()
    }

    #[test]
    fn test_sequential_chains_every_step() {
        let registry = registry();
        let compiler = WorkflowCompiler::new(&registry);
        let plan = plan_of(&["measure-coverage", "generate-missing-tests", "run-unit-tests"]);

        let steps = compiler.compile(&plan, WorkflowStrategy::Sequential).unwrap();
        assert_eq!(steps.len(), 3);
        assert!(steps[0].depends_on.is_empty());
        assert_eq!(steps[1].depends_on, vec![steps[0].id.clone()]);
        assert_eq!(steps[2].depends_on, vec![steps[1].id.clone()]);
    }

    #[test]
    fn test_parallel_uses_dataflow_dependencies() {
        let registry = registry();
        let compiler = WorkflowCompiler::new(&registry);
        let plan = plan_of(&[
            "run-unit-tests",
            "evaluate-quality-gate",
            "finalize-quality-gate",
        ]);

        let steps = compiler.compile(&plan, WorkflowStrategy::Parallel).unwrap();

        // run-unit-tests produces quality.tests_measured which evaluate
        // requires; evaluate produces quality.gate_evaluated which finalize
        // requires.
        assert!(steps[0].depends_on.is_empty());
        assert_eq!(steps[1].depends_on, vec![steps[0].id.clone()]);
        assert_eq!(steps[2].depends_on, vec![steps[1].id.clone()]);
    }

    #[test]
    fn test_independent_steps_have_no_dependencies() {
        let registry = registry();
        let compiler = WorkflowCompiler::new(&registry);
        let plan = plan_of(&["measure-coverage", "security-scan", "analyze-coverage-gaps"]);

        let steps = compiler.compile(&plan, WorkflowStrategy::Parallel).unwrap();
        assert!(steps[0].depends_on.is_empty());
        // security-scan shares no dataflow with measure-coverage.
        assert!(steps[1].depends_on.is_empty());
        // analyze-coverage-gaps needs coverage.measured from measure-coverage.
        assert_eq!(steps[2].depends_on, vec![steps[0].id.clone()]);
    }

    #[test]
    fn test_adaptive_marks_roots_parallel() {
        let registry = registry();
        let compiler = WorkflowCompiler::new(&registry);
        let plan = plan_of(&["measure-coverage", "security-scan", "analyze-coverage-gaps"]);

        let steps = compiler.compile(&plan, WorkflowStrategy::Adaptive).unwrap();
        assert!(steps[0].can_run_parallel);
        assert!(steps[1].can_run_parallel);
        assert!(!steps[2].can_run_parallel);
    }

    #[test]
    fn test_dependency_soundness() {
        let registry = registry();
        let compiler = WorkflowCompiler::new(&registry);
        let plan = plan_of(&[
            "measure-coverage",
            "run-unit-tests",
            "generate-missing-tests",
            "evaluate-quality-gate",
            "finalize-quality-gate",
        ]);

        let steps = compiler.compile(&plan, WorkflowStrategy::Parallel).unwrap();
        let position: HashMap<&str, usize> = steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();

        for step in &steps {
            let action = registry.get(&step.source_action_id).unwrap();
            for dependency in &step.depends_on {
                // Dependency appears earlier in the linear plan.
                assert!(position[dependency.as_str()] < position[step.id.as_str()]);

                // And its effects set a field the step's preconditions name.
                let producer_id = &steps[position[dependency.as_str()]].source_action_id;
                let producer = registry.get(producer_id).unwrap();
                assert!(action.preconditions.iter().any(|condition| {
                    producer
                        .effects
                        .iter()
                        .any(|effect| effect.sets_field(&condition.field))
                }));
            }
        }
    }

    #[test]
    fn test_step_typing() {
        let registry = registry();
        let compiler = WorkflowCompiler::new(&registry);
        let plan = plan_of(&[
            "analyze-impact",
            "analyze-coverage-gaps",
            "generate-missing-tests",
            "run-unit-tests",
            "security-scan",
            "performance-baseline",
            "evaluate-quality-gate",
            "spawn-agent",
        ]);

        let steps = compiler.compile(&plan, WorkflowStrategy::Sequential).unwrap();
        let types: Vec<StepType> = steps.iter().map(|s| s.step_type).collect();
        assert_eq!(
            types,
            vec![
                StepType::Analysis,
                StepType::CoverageAnalysis,
                StepType::TestGeneration,
                StepType::TestExecution,
                StepType::SecurityAnalysis,
                StepType::PerformanceTesting,
                StepType::DecisionMaking,
                StepType::ResourceManagement,
            ]
        );
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let registry = registry();
        let compiler = WorkflowCompiler::new(&registry);
        let plan = plan_of(&["measure-coverage", "not-an-action"]);

        let err = compiler
            .compile(&plan, WorkflowStrategy::Parallel)
            .unwrap_err();
        assert_eq!(err, CompileError::UnknownAction("not-an-action".to_string()));
    }
}
