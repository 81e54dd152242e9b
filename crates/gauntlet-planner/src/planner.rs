use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use gauntlet_core::action::{Action, ActionCategory, ActionRegistry};
use gauntlet_core::condition::{satisfies, Condition};
use gauntlet_core::effect::apply_effects;
use gauntlet_core::goal::Goal;
use gauntlet_core::state::WorldState;

use crate::heuristic::Heuristic;
use crate::plan::{now_ms, NoPlanReason, Plan, PlanError, PlanStatus};

/// Floor for success-rate division so near-zero rates do not blow up costs.
const SUCCESS_RATE_EPSILON: f64 = 0.05;

/// Search limits for one `plan` call.
#[derive(Debug, Clone)]
pub struct PlanConstraints {
    pub max_iterations: u64,
    pub timeout_ms: u64,
    /// Restrict the search to these categories when set.
    pub allowed_categories: Option<Vec<ActionCategory>>,
    pub excluded_actions: Vec<String>,
    pub max_plan_length: Option<usize>,
}

impl Default for PlanConstraints {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            timeout_ms: 5_000,
            allowed_categories: None,
            excluded_actions: Vec::new(),
            max_plan_length: None,
        }
    }
}

/// Cooperative cancellation for long searches; checked on every expansion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::SeqCst)
    }
}

/// Goal-oriented action planner: A* over symbolic world states.
///
/// The planner is pure and CPU-bound. Every `plan` call owns its open and
/// closed sets, so concurrent calls on one planner are safe; the registry is
/// read-only shared state.
pub struct GoapPlanner {
    registry: ActionRegistry,
}

struct SearchNode {
    state: WorldState,
    parent: Option<usize>,
    action: Option<Arc<Action>>,
    g: f64,
    /// Raw action cost spent so far; compared against the resource budget.
    budget_spent: f64,
    depth: usize,
}

struct OpenEntry {
    f: f64,
    h: f64,
    duration_ms: f64,
    last_action_id: String,
    seq: u64,
    node: usize,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenEntry {
    // BinaryHeap pops the greatest entry, so "greater" must mean "expand
    // first": lower f, then lower h, then lower duration, then
    // lexicographically smaller last action id, then earlier insertion.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .partial_cmp(&self.f)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.h.partial_cmp(&self.h).unwrap_or(Ordering::Equal))
            .then_with(|| {
                other
                    .duration_ms
                    .partial_cmp(&self.duration_ms)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| other.last_action_id.cmp(&self.last_action_id))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl GoapPlanner {
    pub fn new(registry: ActionRegistry) -> Self {
        Self { registry }
    }

    pub fn with_default_catalog() -> Self {
        Self::new(ActionRegistry::with_default_catalog())
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Plan toward a registered goal, honoring its category whitelist and
    /// deadline budget on top of the caller's constraints.
    pub fn plan_goal(
        &self,
        initial: &WorldState,
        goal: &Goal,
        constraints: &PlanConstraints,
        cancel: Option<&CancelToken>,
    ) -> Result<Plan, PlanError> {
        let mut effective = constraints.clone();
        effective.allowed_categories = match (&constraints.allowed_categories, &goal.allowed_categories) {
            (Some(from_caller), Some(from_goal)) => Some(
                from_caller
                    .iter()
                    .copied()
                    .filter(|c| from_goal.contains(c))
                    .collect(),
            ),
            (Some(from_caller), None) => Some(from_caller.clone()),
            (None, Some(from_goal)) => Some(from_goal.clone()),
            (None, None) => None,
        };

        let mut initial = initial.clone();
        if let Some(deadline) = goal.deadline_budget_secs {
            initial.resources.time_remaining =
                initial.resources.time_remaining.min(deadline as f64);
        }

        self.plan(&initial, &goal.id, &goal.conditions, &effective, cancel)
    }

    /// Plan from `initial` to a state satisfying every condition.
    pub fn plan(
        &self,
        initial: &WorldState,
        goal_id: &str,
        goal_conditions: &[Condition],
        constraints: &PlanConstraints,
        cancel: Option<&CancelToken>,
    ) -> Result<Plan, PlanError> {
        let started = Instant::now();

        if satisfies(initial, goal_conditions) {
            return Ok(self.empty_plan(initial, goal_id));
        }

        let candidates = self.candidate_actions(constraints);
        let heuristic = Heuristic::new(self.registry.min_catalog_cost());
        let budget = initial.resources.time_remaining;

        let mut arena: Vec<SearchNode> = Vec::new();
        let mut open: BinaryHeap<OpenEntry> = BinaryHeap::new();
        // Best g seen per canonical state; never re-expand at equal or
        // higher cost.
        let mut closed: HashMap<String, f64> = HashMap::new();

        arena.push(SearchNode {
            state: initial.clone(),
            parent: None,
            action: None,
            g: 0.0,
            budget_spent: 0.0,
            depth: 0,
        });
        open.push(OpenEntry {
            f: heuristic.estimate(initial, goal_conditions),
            h: heuristic.estimate(initial, goal_conditions),
            duration_ms: 0.0,
            last_action_id: String::new(),
            seq: 0,
            node: 0,
        });

        let mut iterations: u64 = 0;
        let mut seq: u64 = 0;
        let mut any_applicable = false;
        let mut budget_pruned = false;

        while let Some(entry) = open.pop() {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Err(self.no_plan(NoPlanReason::Cancelled, iterations, started));
                }
            }
            if started.elapsed().as_millis() as u64 > constraints.timeout_ms {
                return Err(self.no_plan(NoPlanReason::Timeout, iterations, started));
            }
            if iterations >= constraints.max_iterations {
                return Err(self.no_plan(NoPlanReason::BudgetExceeded, iterations, started));
            }
            iterations += 1;

            let node_index = entry.node;
            let (state_key, g, budget_spent, depth) = {
                let node = &arena[node_index];
                (node.state.state_key(), node.g, node.budget_spent, node.depth)
            };

            if satisfies(&arena[node_index].state, goal_conditions) {
                return Ok(self.reconstruct(&arena, node_index, initial, goal_id));
            }

            if closed.get(&state_key).map_or(false, |best| *best <= g) {
                continue;
            }
            closed.insert(state_key, g);

            for action in &candidates {
                if !satisfies(&arena[node_index].state, &action.preconditions) {
                    continue;
                }
                any_applicable = true;

                if budget_spent + action.cost > budget {
                    budget_pruned = true;
                    continue;
                }
                if let Some(max_len) = constraints.max_plan_length {
                    if depth + 1 > max_len {
                        budget_pruned = true;
                        continue;
                    }
                }

                let child_state = match apply_effects(&arena[node_index].state, &action.effects) {
                    Ok(state) => state,
                    // Registered actions are schema-validated; a failure here
                    // would be a registry bug, not a planning outcome.
                    Err(_) => continue,
                };

                let child_key = child_state.state_key();
                let child_g = g + action.cost / action.success_rate.max(SUCCESS_RATE_EPSILON);
                if let Some(best) = closed.get(&child_key) {
                    if *best <= child_g {
                        continue;
                    }
                }

                let child_h = heuristic.estimate(&child_state, goal_conditions);
                let child_duration = self.path_duration(&arena, node_index)
                    + inflated_duration_ms(action);

                arena.push(SearchNode {
                    state: child_state,
                    parent: Some(node_index),
                    action: Some(Arc::clone(action)),
                    g: child_g,
                    budget_spent: budget_spent + action.cost,
                    depth: depth + 1,
                });
                seq += 1;
                open.push(OpenEntry {
                    f: child_g + child_h,
                    h: child_h,
                    duration_ms: child_duration,
                    last_action_id: action.id.clone(),
                    seq,
                    node: arena.len() - 1,
                });
            }
        }

        let reason = if !any_applicable {
            NoPlanReason::NoApplicableAction
        } else if budget_pruned {
            NoPlanReason::BudgetExceeded
        } else {
            NoPlanReason::Unreachable
        };
        Err(self.no_plan(reason, iterations, started))
    }

    /// Up to `limit` (capped at three) alternatives that differ from the base
    /// plan by at least one action. Each candidate excludes one prior action;
    /// measurement-flag setters are never excluded since improvement actions
    /// cannot run without them.
    pub fn find_alternative_plans(
        &self,
        initial: &WorldState,
        goal_id: &str,
        goal_conditions: &[Condition],
        constraints: &PlanConstraints,
        base_plan: &Plan,
        limit: usize,
    ) -> Vec<Plan> {
        let limit = limit.min(3);
        let mut alternatives: Vec<Plan> = Vec::new();

        let mut seen: Vec<&str> = Vec::new();
        for action_id in &base_plan.actions {
            if alternatives.len() >= limit {
                break;
            }
            if seen.contains(&action_id.as_str()) {
                continue;
            }
            seen.push(action_id);

            let mandatory = self
                .registry
                .get(action_id)
                .map(|action| action.sets_measurement_flag())
                .unwrap_or(false);
            if mandatory {
                continue;
            }

            let mut restricted = constraints.clone();
            restricted.excluded_actions.push(action_id.clone());

            if let Ok(plan) = self.plan(initial, goal_id, goal_conditions, &restricted, None) {
                let is_new = plan.differs_from(base_plan)
                    && alternatives.iter().all(|existing| plan.differs_from(existing));
                if is_new && !plan.actions.is_empty() {
                    alternatives.push(plan);
                }
            }
        }

        alternatives
    }

    fn candidate_actions(&self, constraints: &PlanConstraints) -> Vec<Arc<Action>> {
        self.registry
            .all()
            .into_iter()
            .filter(|action| action.success_rate > 0.0)
            .filter(|action| !constraints.excluded_actions.contains(&action.id))
            .filter(|action| match &constraints.allowed_categories {
                Some(categories) => categories.contains(&action.category),
                None => true,
            })
            .collect()
    }

    fn path_duration(&self, arena: &[SearchNode], mut index: usize) -> f64 {
        let mut total = 0.0;
        loop {
            let node = &arena[index];
            if let Some(action) = &node.action {
                total += inflated_duration_ms(action);
            }
            match node.parent {
                Some(parent) => index = parent,
                None => return total,
            }
        }
    }

    fn reconstruct(
        &self,
        arena: &[SearchNode],
        goal_index: usize,
        initial: &WorldState,
        goal_id: &str,
    ) -> Plan {
        let mut actions: Vec<String> = Vec::new();
        let mut duration_ms = 0.0;
        let mut index = goal_index;
        loop {
            let node = &arena[index];
            if let Some(action) = &node.action {
                actions.push(action.id.clone());
                duration_ms += inflated_duration_ms(action);
            }
            match node.parent {
                Some(parent) => index = parent,
                None => break,
            }
        }
        actions.reverse();

        Plan {
            id: Uuid::new_v4().to_string(),
            goal_id: goal_id.to_string(),
            actions,
            total_cost: arena[goal_index].g,
            estimated_duration_ms: duration_ms.round() as u64,
            initial_state: initial.clone(),
            goal_state: arena[goal_index].state.clone(),
            status: PlanStatus::Pending,
            created_at_ms: now_ms(),
            started_at_ms: None,
            completed_at_ms: None,
        }
    }

    fn empty_plan(&self, initial: &WorldState, goal_id: &str) -> Plan {
        Plan {
            id: Uuid::new_v4().to_string(),
            goal_id: goal_id.to_string(),
            actions: Vec::new(),
            total_cost: 0.0,
            estimated_duration_ms: 0,
            initial_state: initial.clone(),
            goal_state: initial.clone(),
            status: PlanStatus::Pending,
            created_at_ms: now_ms(),
            started_at_ms: None,
            completed_at_ms: None,
        }
    }

    fn no_plan(&self, reason: NoPlanReason, iterations: u64, started: Instant) -> PlanError {
        PlanError::NoPlan {
            reason,
            iterations,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Duration estimate inflated by expected retries.
fn inflated_duration_ms(action: &Action) -> f64 {
    action.duration_estimate_ms as f64 / action.success_rate.max(SUCCESS_RATE_EPSILON)
}
