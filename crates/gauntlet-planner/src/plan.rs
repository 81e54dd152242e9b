use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use gauntlet_core::WorldState;

/// Lifecycle of a plan from search success to execution outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Replanned,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Running => "running",
            PlanStatus::Succeeded => "succeeded",
            PlanStatus::Failed => "failed",
            PlanStatus::Replanned => "replanned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PlanStatus::Pending),
            "running" => Some(PlanStatus::Running),
            "succeeded" => Some(PlanStatus::Succeeded),
            "failed" => Some(PlanStatus::Failed),
            "replanned" => Some(PlanStatus::Replanned),
            _ => None,
        }
    }
}

/// An ordered action sequence found by the A* search.
///
/// `actions` is the linear order; the workflow compiler derives the DAG
/// later. `total_cost` is the search cost (action costs inflated by expected
/// retries), `estimated_duration_ms` the matching duration estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub goal_id: String,
    pub actions: Vec<String>,
    pub total_cost: f64,
    pub estimated_duration_ms: u64,
    pub initial_state: WorldState,
    pub goal_state: WorldState,
    pub status: PlanStatus,
    pub created_at_ms: i64,
    pub started_at_ms: Option<i64>,
    pub completed_at_ms: Option<i64>,
}

impl Plan {
    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Whether two plans differ in at least one action id.
    pub fn differs_from(&self, other: &Plan) -> bool {
        use std::collections::BTreeSet;
        let mine: BTreeSet<&str> = self.actions.iter().map(String::as_str).collect();
        let theirs: BTreeSet<&str> = other.actions.iter().map(String::as_str).collect();
        mine != theirs
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Why a search ended without a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoPlanReason {
    /// Applicable actions were exhausted without reaching the goal.
    Unreachable,
    /// The iteration budget, plan-length bound, or resource budget cut the
    /// search off.
    BudgetExceeded,
    Timeout,
    /// No registered action was applicable to any explored state.
    NoApplicableAction,
    Cancelled,
}

/// Typed planner failure; pure search code never panics on valid input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("no plan ({reason:?}) after {iterations} iterations in {elapsed_ms} ms")]
    NoPlan {
        reason: NoPlanReason,
        iterations: u64,
        elapsed_ms: u64,
    },
}

impl PlanError {
    pub fn reason(&self) -> NoPlanReason {
        match self {
            PlanError::NoPlan { reason, .. } => *reason,
        }
    }
}
