use gauntlet_core::condition::{Condition, ConditionOp};
use gauntlet_core::state::{field_kind, FieldKind, WorldState};

/// Admissible remaining-cost estimate for the A* search.
///
/// Each unsatisfied goal condition contributes a normalized distance in
/// "units of progress": percentage fields scale their numeric gap by 100,
/// counts by 1, and discrete conditions contribute a single unit. The unit
/// total is multiplied by the minimum cost in the action catalog, which is
/// never greater than the cost of any action that actually makes progress,
/// so the estimate underestimates true remaining cost.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Heuristic {
    min_catalog_cost: f64,
}

impl Heuristic {
    pub(crate) fn new(min_catalog_cost: f64) -> Self {
        let min_catalog_cost = if min_catalog_cost.is_finite() {
            min_catalog_cost
        } else {
            0.0
        };
        Self { min_catalog_cost }
    }

    pub(crate) fn estimate(&self, state: &WorldState, conditions: &[Condition]) -> f64 {
        let units: f64 = conditions
            .iter()
            .map(|condition| condition_distance(state, condition))
            .sum();
        units * self.min_catalog_cost
    }
}

fn condition_distance(state: &WorldState, condition: &Condition) -> f64 {
    if condition.eval(state) {
        return 0.0;
    }

    let scale = match field_kind(&condition.field) {
        Some(FieldKind::Percent) => 100.0,
        _ => 1.0,
    };
    let current = state
        .get_field(&condition.field)
        .and_then(|v| v.as_number());

    match (&condition.op, current) {
        (ConditionOp::Gte(bound), Some(current)) | (ConditionOp::Gt(bound), Some(current)) => {
            ((bound - current).abs() / scale).max(1.0 / scale)
        }
        (ConditionOp::Lte(bound), Some(current)) | (ConditionOp::Lt(bound), Some(current)) => {
            ((current - bound).abs() / scale).max(1.0 / scale)
        }
        // Discrete conditions (eq/ne/in/exists/matches) and missing fields
        // are one unit away.
        _ => 1.0,
    }
}
