use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::state::{field_kind, FieldKind, FieldValue, WorldState};

/// A single predicate over one state field.
///
/// A condition set is satisfied iff every condition in it evaluates true on
/// the current state. Conditions referencing unknown fields are rejected at
/// registration; see [`Condition::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    #[serde(flatten)]
    pub op: ConditionOp,
}

/// Comparison operators usable in conditions.
///
/// `In` on a list-valued field tests that every listed value is a member of
/// the sequence; on scalar fields it is plain set membership. `Exists` means
/// "present and non-empty" for text and list fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum ConditionOp {
    Eq(FieldValue),
    Ne(FieldValue),
    Lt(f64),
    Lte(f64),
    Gt(f64),
    Gte(f64),
    In(Vec<FieldValue>),
    Exists,
    Matches(String),
}

impl ConditionOp {
    fn name(&self) -> &'static str {
        match self {
            ConditionOp::Eq(_) => "eq",
            ConditionOp::Ne(_) => "ne",
            ConditionOp::Lt(_) => "lt",
            ConditionOp::Lte(_) => "lte",
            ConditionOp::Gt(_) => "gt",
            ConditionOp::Gte(_) => "gte",
            ConditionOp::In(_) => "in",
            ConditionOp::Exists => "exists",
            ConditionOp::Matches(_) => "matches",
        }
    }
}

impl Condition {
    pub fn new(field: impl Into<String>, op: ConditionOp) -> Self {
        Self {
            field: field.into(),
            op,
        }
    }

    /// `field >= bound` for numeric fields.
    pub fn gte(field: impl Into<String>, bound: f64) -> Self {
        Self::new(field, ConditionOp::Gte(bound))
    }

    /// `field <= bound` for numeric fields.
    pub fn lte(field: impl Into<String>, bound: f64) -> Self {
        Self::new(field, ConditionOp::Lte(bound))
    }

    /// `field == value` for boolean flags.
    pub fn flag_is(field: impl Into<String>, value: bool) -> Self {
        Self::new(field, ConditionOp::Eq(FieldValue::Flag(value)))
    }

    /// `field == value` for text fields.
    pub fn text_is(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, ConditionOp::Eq(FieldValue::Text(value.into())))
    }

    /// Membership test; on list fields, requires every value to be present.
    pub fn contains(field: impl Into<String>, values: Vec<FieldValue>) -> Self {
        Self::new(field, ConditionOp::In(values))
    }

    /// Evaluate against a state. Unknown or unset fields fail every operator,
    /// including `exists`.
    pub fn eval(&self, state: &WorldState) -> bool {
        let current = match state.get_field(&self.field) {
            Some(value) => value,
            None => return false,
        };

        match &self.op {
            ConditionOp::Eq(expected) => &current == expected,
            ConditionOp::Ne(expected) => &current != expected,
            ConditionOp::Lt(bound) => current.as_number().map_or(false, |n| n < *bound),
            ConditionOp::Lte(bound) => current.as_number().map_or(false, |n| n <= *bound),
            ConditionOp::Gt(bound) => current.as_number().map_or(false, |n| n > *bound),
            ConditionOp::Gte(bound) => current.as_number().map_or(false, |n| n >= *bound),
            ConditionOp::In(values) => match &current {
                FieldValue::List(items) => values.iter().all(|value| {
                    value
                        .as_text()
                        .map_or(false, |text| items.iter().any(|item| item == text))
                }),
                scalar => values.iter().any(|value| value == scalar),
            },
            ConditionOp::Exists => match &current {
                FieldValue::Text(s) => !s.is_empty(),
                FieldValue::List(items) => !items.is_empty(),
                _ => true,
            },
            ConditionOp::Matches(pattern) => match &current {
                FieldValue::Text(s) => Regex::new(pattern).map_or(false, |re| re.is_match(s)),
                _ => false,
            },
        }
    }

    /// Check the field exists in the schema and the operator is compatible
    /// with its kind. Called once at registration; evaluation assumes a
    /// validated condition.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let kind = field_kind(&self.field)
            .ok_or_else(|| ValidationError::UnknownField(self.field.clone()))?;

        let compatible = match &self.op {
            ConditionOp::Eq(value) | ConditionOp::Ne(value) => value_matches_kind(value, kind),
            ConditionOp::Lt(_) | ConditionOp::Lte(_) | ConditionOp::Gt(_) | ConditionOp::Gte(_) => {
                matches!(kind, FieldKind::Percent | FieldKind::Number)
            }
            ConditionOp::In(values) => match kind {
                FieldKind::List => values.iter().all(|v| matches!(v, FieldValue::Text(_))),
                _ => values.iter().all(|v| value_matches_kind(v, kind)),
            },
            ConditionOp::Exists => true,
            ConditionOp::Matches(pattern) => {
                if !matches!(kind, FieldKind::Text) {
                    false
                } else {
                    Regex::new(pattern).map_err(|e| ValidationError::InvalidPattern {
                        field: self.field.clone(),
                        pattern: pattern.clone(),
                        message: e.to_string(),
                    })?;
                    true
                }
            }
        };

        if compatible {
            Ok(())
        } else {
            Err(ValidationError::OperatorMismatch {
                field: self.field.clone(),
                op: self.op.name().to_string(),
                kind: kind.as_str().to_string(),
            })
        }
    }
}

fn value_matches_kind(value: &FieldValue, kind: FieldKind) -> bool {
    matches!(
        (value, kind),
        (FieldValue::Number(_), FieldKind::Percent)
            | (FieldValue::Number(_), FieldKind::Number)
            | (FieldValue::Flag(_), FieldKind::Flag)
            | (FieldValue::Text(_), FieldKind::Text)
            | (FieldValue::List(_), FieldKind::List)
    )
}

/// True iff every condition in the set holds on the state.
pub fn satisfies(state: &WorldState, conditions: &[Condition]) -> bool {
    conditions.iter().all(|condition| condition.eval(state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_operators() {
        let mut state = WorldState::default();
        state.coverage.line = 55.0;

        assert!(Condition::gte("coverage.line", 50.0).eval(&state));
        assert!(!Condition::gte("coverage.line", 80.0).eval(&state));
        assert!(Condition::lte("coverage.line", 55.0).eval(&state));
        assert!(Condition::new("coverage.line", ConditionOp::Lt(56.0)).eval(&state));
        assert!(!Condition::new("coverage.line", ConditionOp::Gt(55.0)).eval(&state));
    }

    #[test]
    fn test_flag_and_text_equality() {
        let mut state = WorldState::default();
        state.quality.tests_measured = true;

        assert!(Condition::flag_is("quality.tests_measured", true).eval(&state));
        assert!(!Condition::flag_is("coverage.measured", true).eval(&state));
        assert!(Condition::text_is("quality.gate_status", "pending").eval(&state));
        assert!(
            Condition::new(
                "quality.gate_status",
                ConditionOp::Ne(FieldValue::Text("passed".to_string()))
            )
            .eval(&state)
        );
    }

    #[test]
    fn test_in_on_scalar_and_list() {
        let mut state = WorldState::default();
        state.context.requirements = vec!["audit-trail".to_string(), "gdpr".to_string()];

        let scalar = Condition::contains(
            "context.environment",
            vec![
                FieldValue::Text("staging".to_string()),
                FieldValue::Text("development".to_string()),
            ],
        );
        assert!(scalar.eval(&state));

        let all_present = Condition::contains(
            "context.requirements",
            vec![FieldValue::Text("gdpr".to_string())],
        );
        assert!(all_present.eval(&state));

        let missing = Condition::contains(
            "context.requirements",
            vec![
                FieldValue::Text("gdpr".to_string()),
                FieldValue::Text("sox".to_string()),
            ],
        );
        assert!(!missing.eval(&state));
    }

    #[test]
    fn test_exists() {
        let mut state = WorldState::default();
        assert!(!Condition::new("context.impacted_files", ConditionOp::Exists).eval(&state));
        assert!(!Condition::new("context.project_id", ConditionOp::Exists).eval(&state));

        state.context.impacted_files.push("src/lib.rs".to_string());
        state.context.project_id = Some("acme".to_string());
        assert!(Condition::new("context.impacted_files", ConditionOp::Exists).eval(&state));
        assert!(Condition::new("context.project_id", ConditionOp::Exists).eval(&state));
    }

    #[test]
    fn test_matches() {
        let mut state = WorldState::default();
        state.context.project_id = Some("qe-fleet-42".to_string());

        let cond = Condition::new(
            "context.project_id",
            ConditionOp::Matches(r"^qe-fleet-\d+$".to_string()),
        );
        assert!(cond.eval(&state));

        let cond = Condition::new(
            "context.project_id",
            ConditionOp::Matches(r"^prod-".to_string()),
        );
        assert!(!cond.eval(&state));
    }

    #[test]
    fn test_validate_rejects_unknown_field() {
        let err = Condition::gte("coverage.lines", 80.0).validate().unwrap_err();
        assert_eq!(err, ValidationError::UnknownField("coverage.lines".to_string()));
    }

    #[test]
    fn test_validate_rejects_operator_mismatch() {
        let err = Condition::gte("coverage.measured", 1.0).validate().unwrap_err();
        assert!(matches!(err, ValidationError::OperatorMismatch { .. }));

        let err = Condition::new("coverage.line", ConditionOp::Matches(".*".to_string()))
            .validate()
            .unwrap_err();
        assert!(matches!(err, ValidationError::OperatorMismatch { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_regex() {
        let err = Condition::new("context.project_id", ConditionOp::Matches("[".to_string()))
            .validate()
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidPattern { .. }));
    }

    #[test]
    fn test_condition_serde_roundtrip() {
        let cond = Condition::gte("coverage.line", 80.0);
        let json = serde_json::to_string(&cond).unwrap();
        assert!(json.contains("\"op\":\"gte\""));
        let back: Condition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cond);
    }
}
