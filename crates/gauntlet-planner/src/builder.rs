use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use gauntlet_core::action::ActionRegistry;
use gauntlet_core::executor::ExecutorRegistry;
use gauntlet_core::state::{
    ChangeSize, ContextState, CoverageState, Environment, FleetState, QualityState, ResourceState,
    RiskLevel, WorldState,
};

/// Executor types the builder assumes when no registry is attached; matches
/// the default action catalog.
const DEFAULT_AGENT_TYPES: &[&str] = &[
    "bdd-generator",
    "coverage-analyzer",
    "fleet-commander",
    "impact-analyzer",
    "performance-tester",
    "quality-gate",
    "security-scanner",
    "static-analyzer",
    "test-executor",
    "test-generator",
];

/// Measured quality metrics feeding a planning request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySnapshot {
    pub line_coverage: f64,
    pub branch_coverage: f64,
    pub function_coverage: f64,
    pub coverage_target: f64,
    pub tests_passing: f64,
    pub technical_debt: f64,
    pub critical_vulnerabilities: u32,
    pub high_vulnerabilities: u32,
    pub medium_vulnerabilities: u32,
    pub low_vulnerabilities: u32,
    pub p95_latency_ms: f64,
    /// Errors per request, e.g. 0.02 for two percent.
    pub error_rate: f64,
}

impl Default for QualitySnapshot {
    fn default() -> Self {
        Self {
            line_coverage: 0.0,
            branch_coverage: 0.0,
            function_coverage: 0.0,
            coverage_target: 80.0,
            tests_passing: 0.0,
            technical_debt: 0.0,
            critical_vulnerabilities: 0,
            high_vulnerabilities: 0,
            medium_vulnerabilities: 0,
            low_vulnerabilities: 0,
            p95_latency_ms: 0.0,
            error_rate: 0.0,
        }
    }
}

/// Resource limits for the plan about to be searched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceBudget {
    pub time_remaining_secs: f64,
    pub memory_available_mb: f64,
    pub parallel_slots: u32,
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self {
            time_remaining_secs: 3600.0,
            memory_available_mb: 4096.0,
            parallel_slots: 4,
        }
    }
}

/// Change context; risk and change size are inferred when not overridden.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContextSeed {
    pub environment: Environment,
    pub hotfix: bool,
    pub changed_files: Vec<String>,
    pub previous_failures: u32,
    pub risk_override: Option<RiskLevel>,
    pub project_id: Option<String>,
}

/// Assembles a [`WorldState`] from measured metrics, the executor registry,
/// resource budgets, and change context. All inferences are deterministic
/// and all measurement flags start false.
pub struct WorldStateBuilder<'a> {
    quality: QualitySnapshot,
    resources: ResourceBudget,
    context: ContextSeed,
    executors: Option<&'a dyn ExecutorRegistry>,
    action_agent_types: Option<Vec<String>>,
}

impl<'a> WorldStateBuilder<'a> {
    pub fn new() -> Self {
        Self {
            quality: QualitySnapshot::default(),
            resources: ResourceBudget::default(),
            context: ContextSeed::default(),
            executors: None,
            action_agent_types: None,
        }
    }

    pub fn quality(mut self, quality: QualitySnapshot) -> Self {
        self.quality = quality;
        self
    }

    pub fn resources(mut self, resources: ResourceBudget) -> Self {
        self.resources = resources;
        self
    }

    pub fn context(mut self, context: ContextSeed) -> Self {
        self.context = context;
        self
    }

    pub fn executor_registry(mut self, executors: &'a dyn ExecutorRegistry) -> Self {
        self.executors = Some(executors);
        self
    }

    /// Restrict spawn-on-demand signalling to executor types some registered
    /// action actually dispatches to.
    pub fn action_registry(mut self, actions: &ActionRegistry) -> Self {
        self.action_agent_types = Some(actions.agent_types());
        self
    }

    pub fn build(self) -> WorldState {
        let coverage = CoverageState {
            line: self.quality.line_coverage.clamp(0.0, 100.0),
            branch: self.quality.branch_coverage.clamp(0.0, 100.0),
            function: self.quality.function_coverage.clamp(0.0, 100.0),
            target: self.quality.coverage_target.clamp(0.0, 100.0),
            measured: false,
        };

        let quality = QualityState {
            tests_passing: self.quality.tests_passing.clamp(0.0, 100.0),
            security_score: security_score(
                self.quality.critical_vulnerabilities,
                self.quality.high_vulnerabilities,
                self.quality.medium_vulnerabilities,
                self.quality.low_vulnerabilities,
            ),
            performance_score: performance_score(
                self.quality.p95_latency_ms,
                self.quality.error_rate,
            ),
            technical_debt: self.quality.technical_debt.max(0.0),
            ..Default::default()
        };

        let fleet = self.build_fleet();

        let resources = ResourceState {
            time_remaining: self.resources.time_remaining_secs.max(0.0),
            memory_available: self.resources.memory_available_mb.max(0.0),
            parallel_slots: self.resources.parallel_slots,
        };

        let change_size = infer_change_size(self.context.changed_files.len());
        let risk_level = self.context.risk_override.unwrap_or_else(|| {
            infer_risk_level(
                self.context.environment,
                self.context.hotfix,
                change_size,
                self.context.previous_failures,
            )
        });

        let context = ContextState {
            environment: self.context.environment,
            change_size,
            risk_level,
            previous_failures: self.context.previous_failures,
            impacted_files: self.context.changed_files,
            project_id: self.context.project_id,
            requirements: Vec::new(),
            impact_analyzed: false,
            coverage_gaps_analyzed: false,
            bdd_generated: false,
        };

        WorldState {
            coverage,
            quality,
            fleet,
            resources,
            context,
        }
    }

    fn build_fleet(&self) -> FleetState {
        let registry = match self.executors {
            Some(registry) => registry,
            None => {
                // No registry attached: assume the default action agent
                // types can be spawned on demand.
                let available: Vec<String> = self
                    .action_agent_types
                    .clone()
                    .unwrap_or_else(|| DEFAULT_AGENT_TYPES.iter().map(|s| s.to_string()).collect());
                return FleetState {
                    active_agents: 0,
                    available_agents: available,
                    busy_agents: Vec::new(),
                    agent_types: BTreeMap::new(),
                    topology_optimized: false,
                };
            }
        };

        let all = registry.all();
        let mut agent_types: BTreeMap<String, u32> = BTreeMap::new();
        for executor in &all {
            *agent_types.entry(executor.executor_type.clone()).or_insert(0) += 1;
        }

        let available_agents: Vec<String> = all
            .iter()
            .filter(|e| e.status.can_accept_work())
            .map(|e| e.executor_type.clone())
            .collect();
        let busy_agents: Vec<String> = all
            .iter()
            .filter(|e| !e.status.can_accept_work())
            .map(|e| e.executor_type.clone())
            .collect();

        let available_agents = if available_agents.is_empty() {
            // No idle executors: surface the registry types the catalog can
            // use, signalling that executors can be spawned on demand.
            let mut types = registry.supported_types();
            if let Some(action_types) = &self.action_agent_types {
                types.retain(|t| action_types.contains(t));
            }
            types
        } else {
            available_agents
        };

        FleetState {
            active_agents: all.len() as u32,
            available_agents,
            busy_agents,
            agent_types,
            topology_optimized: false,
        }
    }
}

impl Default for WorldStateBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// `max(0, 100 - 25*critical - 15*high - 5*medium - 1*low)`.
pub fn security_score(critical: u32, high: u32, medium: u32, low: u32) -> f64 {
    let penalty =
        25.0 * critical as f64 + 15.0 * high as f64 + 5.0 * medium as f64 + 1.0 * low as f64;
    (100.0 - penalty).max(0.0)
}

/// 100 minus latency overage past 200 ms (one point per 20 ms) and ten
/// points per unit of error rate, clamped to [0, 100].
pub fn performance_score(p95_latency_ms: f64, error_rate: f64) -> f64 {
    let latency_penalty = ((p95_latency_ms - 200.0) / 20.0).max(0.0);
    let error_penalty = 10.0 * error_rate.max(0.0);
    (100.0 - latency_penalty - error_penalty).clamp(0.0, 100.0)
}

fn infer_change_size(changed_files: usize) -> ChangeSize {
    if changed_files <= 5 {
        ChangeSize::Small
    } else if changed_files <= 20 {
        ChangeSize::Medium
    } else {
        ChangeSize::Large
    }
}

fn infer_risk_level(
    environment: Environment,
    hotfix: bool,
    change_size: ChangeSize,
    previous_failures: u32,
) -> RiskLevel {
    if environment == Environment::Production && hotfix {
        return RiskLevel::Critical;
    }
    if environment == Environment::Production {
        return RiskLevel::High;
    }
    if environment == Environment::Staging && change_size == ChangeSize::Large {
        return RiskLevel::High;
    }
    if previous_failures >= 3 {
        return RiskLevel::High;
    }
    if previous_failures >= 1 {
        return RiskLevel::Medium;
    }
    if change_size == ChangeSize::Large {
        return RiskLevel::Medium;
    }
    RiskLevel::Low
}
