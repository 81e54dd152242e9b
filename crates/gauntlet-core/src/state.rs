use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ValidationError;

/// Symbolic world state the planner searches over.
///
/// The state is a typed composite rather than a property bag: every field the
/// condition and effect operators can address is declared in [`schema`], and
/// registration of actions or goals that reference an unknown field fails
/// up front. Fields are addressed by dotted path, e.g. `"coverage.line"` or
/// `"quality.gate_status"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WorldState {
    pub coverage: CoverageState,
    pub quality: QualityState,
    pub fleet: FleetState,
    pub resources: ResourceState,
    pub context: ContextState,
}

/// Coverage metrics as percentages plus the measurement flag that gates
/// coverage-improvement actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageState {
    pub line: f64,
    pub branch: f64,
    pub function: f64,
    pub target: f64,
    pub measured: bool,
}

impl Default for CoverageState {
    fn default() -> Self {
        Self {
            line: 0.0,
            branch: 0.0,
            function: 0.0,
            target: 80.0,
            measured: false,
        }
    }
}

/// Quality scores and the measurement flags for each quality dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QualityState {
    pub tests_passing: f64,
    pub security_score: f64,
    pub performance_score: f64,
    pub technical_debt: f64,
    pub gate_status: GateStatus,
    pub tests_measured: bool,
    pub integration_tested: bool,
    pub security_measured: bool,
    pub performance_measured: bool,
    pub complexity_measured: bool,
    pub gate_evaluated: bool,
    pub smoke_tests_passing: bool,
    pub critical_path_tested: bool,
}

/// Quality-gate lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    #[default]
    Pending,
    Passed,
    Failed,
    ExceptionRequested,
}

impl GateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateStatus::Pending => "pending",
            GateStatus::Passed => "passed",
            GateStatus::Failed => "failed",
            GateStatus::ExceptionRequested => "exception_requested",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(GateStatus::Pending),
            "passed" => Some(GateStatus::Passed),
            "failed" => Some(GateStatus::Failed),
            "exception_requested" => Some(GateStatus::ExceptionRequested),
            _ => None,
        }
    }
}

/// Fleet composition visible to the planner.
///
/// `agent_types` uses a `BTreeMap` so the canonical serialization used for
/// closed-set keys is stable across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FleetState {
    pub active_agents: u32,
    pub available_agents: Vec<String>,
    pub busy_agents: Vec<String>,
    pub agent_types: BTreeMap<String, u32>,
    pub topology_optimized: bool,
}

/// Resource budget for a planning request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Wall-clock seconds available for the plan.
    pub time_remaining: f64,
    /// Megabytes of memory available to executors.
    pub memory_available: f64,
    pub parallel_slots: u32,
}

impl Default for ResourceState {
    fn default() -> Self {
        Self {
            time_remaining: 3600.0,
            memory_available: 4096.0,
            parallel_slots: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "development" => Some(Environment::Development),
            "staging" => Some(Environment::Staging),
            "production" => Some(Environment::Production),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSize {
    #[default]
    Small,
    Medium,
    Large,
}

impl ChangeSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeSize::Small => "small",
            ChangeSize::Medium => "medium",
            ChangeSize::Large => "large",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "small" => Some(ChangeSize::Small),
            "medium" => Some(ChangeSize::Medium),
            "large" => Some(ChangeSize::Large),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            "critical" => Some(RiskLevel::Critical),
            _ => None,
        }
    }
}

/// Change context for the current planning request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ContextState {
    pub environment: Environment,
    pub change_size: ChangeSize,
    pub risk_level: RiskLevel,
    pub previous_failures: u32,
    pub impacted_files: Vec<String>,
    pub project_id: Option<String>,
    /// Free-form requirements appended by goal customization; satisfied by
    /// actions that `add` the matching token.
    pub requirements: Vec<String>,
    pub impact_analyzed: bool,
    pub coverage_gaps_analyzed: bool,
    pub bdd_generated: bool,
}

/// Value of a single addressable state field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            FieldValue::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Flag(b) => write!(f, "{}", b),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

/// Kind of an addressable field, used to validate operators at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Numeric percentage clamped to [0, 100] by effects.
    Percent,
    /// Non-negative number (counts, seconds, megabytes).
    Number,
    Flag,
    /// Enumerated or free text.
    Text,
    /// Ordered sequence of strings.
    List,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Percent => "percent",
            FieldKind::Number => "number",
            FieldKind::Flag => "flag",
            FieldKind::Text => "text",
            FieldKind::List => "list",
        }
    }
}

/// Declaration of one addressable field.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub path: &'static str,
    pub kind: FieldKind,
    /// Measurement flags are set by measurement actions and gate improvement
    /// actions; the alternative-plan search never excludes their setters.
    pub measurement_flag: bool,
}

const SCHEMA: &[FieldSpec] = &[
    FieldSpec { path: "coverage.line", kind: FieldKind::Percent, measurement_flag: false },
    FieldSpec { path: "coverage.branch", kind: FieldKind::Percent, measurement_flag: false },
    FieldSpec { path: "coverage.function", kind: FieldKind::Percent, measurement_flag: false },
    FieldSpec { path: "coverage.target", kind: FieldKind::Percent, measurement_flag: false },
    FieldSpec { path: "coverage.measured", kind: FieldKind::Flag, measurement_flag: true },
    FieldSpec { path: "quality.tests_passing", kind: FieldKind::Percent, measurement_flag: false },
    FieldSpec { path: "quality.security_score", kind: FieldKind::Percent, measurement_flag: false },
    FieldSpec { path: "quality.performance_score", kind: FieldKind::Percent, measurement_flag: false },
    FieldSpec { path: "quality.technical_debt", kind: FieldKind::Number, measurement_flag: false },
    FieldSpec { path: "quality.gate_status", kind: FieldKind::Text, measurement_flag: false },
    FieldSpec { path: "quality.tests_measured", kind: FieldKind::Flag, measurement_flag: true },
    FieldSpec { path: "quality.integration_tested", kind: FieldKind::Flag, measurement_flag: true },
    FieldSpec { path: "quality.security_measured", kind: FieldKind::Flag, measurement_flag: true },
    FieldSpec { path: "quality.performance_measured", kind: FieldKind::Flag, measurement_flag: true },
    FieldSpec { path: "quality.complexity_measured", kind: FieldKind::Flag, measurement_flag: true },
    FieldSpec { path: "quality.gate_evaluated", kind: FieldKind::Flag, measurement_flag: true },
    FieldSpec { path: "quality.smoke_tests_passing", kind: FieldKind::Flag, measurement_flag: false },
    FieldSpec { path: "quality.critical_path_tested", kind: FieldKind::Flag, measurement_flag: false },
    FieldSpec { path: "fleet.active_agents", kind: FieldKind::Number, measurement_flag: false },
    FieldSpec { path: "fleet.available_agents", kind: FieldKind::List, measurement_flag: false },
    FieldSpec { path: "fleet.busy_agents", kind: FieldKind::List, measurement_flag: false },
    FieldSpec { path: "fleet.topology_optimized", kind: FieldKind::Flag, measurement_flag: false },
    FieldSpec { path: "resources.time_remaining", kind: FieldKind::Number, measurement_flag: false },
    FieldSpec { path: "resources.memory_available", kind: FieldKind::Number, measurement_flag: false },
    FieldSpec { path: "resources.parallel_slots", kind: FieldKind::Number, measurement_flag: false },
    FieldSpec { path: "context.environment", kind: FieldKind::Text, measurement_flag: false },
    FieldSpec { path: "context.change_size", kind: FieldKind::Text, measurement_flag: false },
    FieldSpec { path: "context.risk_level", kind: FieldKind::Text, measurement_flag: false },
    FieldSpec { path: "context.previous_failures", kind: FieldKind::Number, measurement_flag: false },
    FieldSpec { path: "context.impacted_files", kind: FieldKind::List, measurement_flag: false },
    FieldSpec { path: "context.project_id", kind: FieldKind::Text, measurement_flag: false },
    FieldSpec { path: "context.requirements", kind: FieldKind::List, measurement_flag: false },
    FieldSpec { path: "context.impact_analyzed", kind: FieldKind::Flag, measurement_flag: true },
    FieldSpec { path: "context.coverage_gaps_analyzed", kind: FieldKind::Flag, measurement_flag: true },
    FieldSpec { path: "context.bdd_generated", kind: FieldKind::Flag, measurement_flag: true },
];

/// All addressable fields with their kinds.
pub fn schema() -> &'static [FieldSpec] {
    SCHEMA
}

/// Kind of a field path, or `None` when the path is not addressable.
pub fn field_kind(path: &str) -> Option<FieldKind> {
    SCHEMA.iter().find(|spec| spec.path == path).map(|spec| spec.kind)
}

/// Whether a field is one of the measurement flags.
pub fn is_measurement_flag(path: &str) -> bool {
    SCHEMA
        .iter()
        .any(|spec| spec.path == path && spec.measurement_flag)
}

impl WorldState {
    /// Read an addressable field. Returns `None` for unknown paths and for
    /// `context.project_id` when it is unset.
    pub fn get_field(&self, path: &str) -> Option<FieldValue> {
        let value = match path {
            "coverage.line" => FieldValue::Number(self.coverage.line),
            "coverage.branch" => FieldValue::Number(self.coverage.branch),
            "coverage.function" => FieldValue::Number(self.coverage.function),
            "coverage.target" => FieldValue::Number(self.coverage.target),
            "coverage.measured" => FieldValue::Flag(self.coverage.measured),
            "quality.tests_passing" => FieldValue::Number(self.quality.tests_passing),
            "quality.security_score" => FieldValue::Number(self.quality.security_score),
            "quality.performance_score" => FieldValue::Number(self.quality.performance_score),
            "quality.technical_debt" => FieldValue::Number(self.quality.technical_debt),
            "quality.gate_status" => FieldValue::Text(self.quality.gate_status.as_str().to_string()),
            "quality.tests_measured" => FieldValue::Flag(self.quality.tests_measured),
            "quality.integration_tested" => FieldValue::Flag(self.quality.integration_tested),
            "quality.security_measured" => FieldValue::Flag(self.quality.security_measured),
            "quality.performance_measured" => FieldValue::Flag(self.quality.performance_measured),
            "quality.complexity_measured" => FieldValue::Flag(self.quality.complexity_measured),
            "quality.gate_evaluated" => FieldValue::Flag(self.quality.gate_evaluated),
            "quality.smoke_tests_passing" => FieldValue::Flag(self.quality.smoke_tests_passing),
            "quality.critical_path_tested" => FieldValue::Flag(self.quality.critical_path_tested),
            "fleet.active_agents" => FieldValue::Number(self.fleet.active_agents as f64),
            "fleet.available_agents" => FieldValue::List(self.fleet.available_agents.clone()),
            "fleet.busy_agents" => FieldValue::List(self.fleet.busy_agents.clone()),
            "fleet.topology_optimized" => FieldValue::Flag(self.fleet.topology_optimized),
            "resources.time_remaining" => FieldValue::Number(self.resources.time_remaining),
            "resources.memory_available" => FieldValue::Number(self.resources.memory_available),
            "resources.parallel_slots" => FieldValue::Number(self.resources.parallel_slots as f64),
            "context.environment" => FieldValue::Text(self.context.environment.as_str().to_string()),
            "context.change_size" => FieldValue::Text(self.context.change_size.as_str().to_string()),
            "context.risk_level" => FieldValue::Text(self.context.risk_level.as_str().to_string()),
            "context.previous_failures" => FieldValue::Number(self.context.previous_failures as f64),
            "context.impacted_files" => FieldValue::List(self.context.impacted_files.clone()),
            "context.project_id" => return self.context.project_id.clone().map(FieldValue::Text),
            "context.requirements" => FieldValue::List(self.context.requirements.clone()),
            "context.impact_analyzed" => FieldValue::Flag(self.context.impact_analyzed),
            "context.coverage_gaps_analyzed" => FieldValue::Flag(self.context.coverage_gaps_analyzed),
            "context.bdd_generated" => FieldValue::Flag(self.context.bdd_generated),
            _ => return None,
        };
        Some(value)
    }

    /// Write an addressable field, clamping percentages to [0, 100] and
    /// numbers to be non-negative.
    pub fn set_field(&mut self, path: &str, value: FieldValue) -> Result<(), ValidationError> {
        let kind = field_kind(path).ok_or_else(|| ValidationError::UnknownField(path.to_string()))?;
        match (kind, &value) {
            (FieldKind::Percent, FieldValue::Number(n)) => {
                self.write_number(path, n.clamp(0.0, 100.0))
            }
            (FieldKind::Number, FieldValue::Number(n)) => self.write_number(path, n.max(0.0)),
            (FieldKind::Flag, FieldValue::Flag(b)) => self.write_flag(path, *b),
            (FieldKind::Text, FieldValue::Text(s)) => self.write_text(path, s),
            (FieldKind::List, FieldValue::List(items)) => self.write_list(path, items.clone()),
            _ => Err(ValidationError::OperatorMismatch {
                field: path.to_string(),
                op: "set".to_string(),
                kind: kind.as_str().to_string(),
            }),
        }
    }

    fn write_number(&mut self, path: &str, value: f64) -> Result<(), ValidationError> {
        match path {
            "coverage.line" => self.coverage.line = value,
            "coverage.branch" => self.coverage.branch = value,
            "coverage.function" => self.coverage.function = value,
            "coverage.target" => self.coverage.target = value,
            "quality.tests_passing" => self.quality.tests_passing = value,
            "quality.security_score" => self.quality.security_score = value,
            "quality.performance_score" => self.quality.performance_score = value,
            "quality.technical_debt" => self.quality.technical_debt = value,
            "fleet.active_agents" => self.fleet.active_agents = value.round() as u32,
            "resources.time_remaining" => self.resources.time_remaining = value,
            "resources.memory_available" => self.resources.memory_available = value,
            "resources.parallel_slots" => self.resources.parallel_slots = value.round() as u32,
            "context.previous_failures" => self.context.previous_failures = value.round() as u32,
            _ => return Err(ValidationError::UnknownField(path.to_string())),
        }
        Ok(())
    }

    fn write_flag(&mut self, path: &str, value: bool) -> Result<(), ValidationError> {
        match path {
            "coverage.measured" => self.coverage.measured = value,
            "quality.tests_measured" => self.quality.tests_measured = value,
            "quality.integration_tested" => self.quality.integration_tested = value,
            "quality.security_measured" => self.quality.security_measured = value,
            "quality.performance_measured" => self.quality.performance_measured = value,
            "quality.complexity_measured" => self.quality.complexity_measured = value,
            "quality.gate_evaluated" => self.quality.gate_evaluated = value,
            "quality.smoke_tests_passing" => self.quality.smoke_tests_passing = value,
            "quality.critical_path_tested" => self.quality.critical_path_tested = value,
            "fleet.topology_optimized" => self.fleet.topology_optimized = value,
            "context.impact_analyzed" => self.context.impact_analyzed = value,
            "context.coverage_gaps_analyzed" => self.context.coverage_gaps_analyzed = value,
            "context.bdd_generated" => self.context.bdd_generated = value,
            _ => return Err(ValidationError::UnknownField(path.to_string())),
        }
        Ok(())
    }

    fn write_text(&mut self, path: &str, value: &str) -> Result<(), ValidationError> {
        match path {
            "quality.gate_status" => {
                self.quality.gate_status =
                    GateStatus::parse(value).ok_or_else(|| ValidationError::InvalidEnumValue {
                        field: path.to_string(),
                        value: value.to_string(),
                    })?;
            }
            "context.environment" => {
                self.context.environment =
                    Environment::parse(value).ok_or_else(|| ValidationError::InvalidEnumValue {
                        field: path.to_string(),
                        value: value.to_string(),
                    })?;
            }
            "context.change_size" => {
                self.context.change_size =
                    ChangeSize::parse(value).ok_or_else(|| ValidationError::InvalidEnumValue {
                        field: path.to_string(),
                        value: value.to_string(),
                    })?;
            }
            "context.risk_level" => {
                self.context.risk_level =
                    RiskLevel::parse(value).ok_or_else(|| ValidationError::InvalidEnumValue {
                        field: path.to_string(),
                        value: value.to_string(),
                    })?;
            }
            "context.project_id" => self.context.project_id = Some(value.to_string()),
            _ => return Err(ValidationError::UnknownField(path.to_string())),
        }
        Ok(())
    }

    fn write_list(&mut self, path: &str, items: Vec<String>) -> Result<(), ValidationError> {
        match path {
            "fleet.available_agents" => self.fleet.available_agents = items,
            "fleet.busy_agents" => self.fleet.busy_agents = items,
            "context.impacted_files" => self.context.impacted_files = items,
            "context.requirements" => self.context.requirements = items,
            _ => return Err(ValidationError::UnknownField(path.to_string())),
        }
        Ok(())
    }

    /// Canonical serialization for closed-set keys. Struct field order is
    /// fixed and `agent_types` is a `BTreeMap`, so equal states always
    /// produce equal keys.
    pub fn state_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
