use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::state::{field_kind, FieldKind, FieldValue, WorldState};

/// A single state mutation produced by an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub field: String,
    #[serde(flatten)]
    pub op: EffectOp,
}

/// Mutation operators. `Add` appends to a sequence only when the value is
/// absent; numeric results clamp at field bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum EffectOp {
    Set(FieldValue),
    Increase(f64),
    Decrease(f64),
    Increment,
    Decrement,
    Add(String),
    Remove(String),
}

impl EffectOp {
    fn name(&self) -> &'static str {
        match self {
            EffectOp::Set(_) => "set",
            EffectOp::Increase(_) => "increase",
            EffectOp::Decrease(_) => "decrease",
            EffectOp::Increment => "increment",
            EffectOp::Decrement => "decrement",
            EffectOp::Add(_) => "add",
            EffectOp::Remove(_) => "remove",
        }
    }
}

impl Effect {
    pub fn new(field: impl Into<String>, op: EffectOp) -> Self {
        Self {
            field: field.into(),
            op,
        }
    }

    pub fn set_flag(field: impl Into<String>, value: bool) -> Self {
        Self::new(field, EffectOp::Set(FieldValue::Flag(value)))
    }

    pub fn set_text(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, EffectOp::Set(FieldValue::Text(value.into())))
    }

    pub fn set_number(field: impl Into<String>, value: f64) -> Self {
        Self::new(field, EffectOp::Set(FieldValue::Number(value)))
    }

    pub fn increase(field: impl Into<String>, amount: f64) -> Self {
        Self::new(field, EffectOp::Increase(amount))
    }

    pub fn decrease(field: impl Into<String>, amount: f64) -> Self {
        Self::new(field, EffectOp::Decrease(amount))
    }

    /// Whether this effect sets a boolean field to true. The workflow
    /// compiler's dependency extraction keys off produced flags.
    pub fn sets_flag(&self) -> bool {
        matches!(&self.op, EffectOp::Set(FieldValue::Flag(true)))
    }

    /// Whether this effect is a `set` on the given field, regardless of the
    /// value written.
    pub fn sets_field(&self, field: &str) -> bool {
        self.field == field && matches!(self.op, EffectOp::Set(_))
    }

    /// Apply to a state in place. Assumes a validated effect; unknown fields
    /// still error rather than panic.
    pub fn apply(&self, state: &mut WorldState) -> Result<(), ValidationError> {
        match &self.op {
            EffectOp::Set(value) => state.set_field(&self.field, value.clone()),
            EffectOp::Increase(amount) => self.shift(state, *amount),
            EffectOp::Decrease(amount) => self.shift(state, -amount),
            EffectOp::Increment => self.shift(state, 1.0),
            EffectOp::Decrement => self.shift(state, -1.0),
            EffectOp::Add(item) => {
                let mut items = state
                    .get_field(&self.field)
                    .and_then(|v| v.as_list().map(<[String]>::to_vec))
                    .ok_or_else(|| ValidationError::UnknownField(self.field.clone()))?;
                if !items.iter().any(|existing| existing == item) {
                    items.push(item.clone());
                }
                state.set_field(&self.field, FieldValue::List(items))
            }
            EffectOp::Remove(item) => {
                let mut items = state
                    .get_field(&self.field)
                    .and_then(|v| v.as_list().map(<[String]>::to_vec))
                    .ok_or_else(|| ValidationError::UnknownField(self.field.clone()))?;
                items.retain(|existing| existing != item);
                state.set_field(&self.field, FieldValue::List(items))
            }
        }
    }

    fn shift(&self, state: &mut WorldState, delta: f64) -> Result<(), ValidationError> {
        let current = state
            .get_field(&self.field)
            .and_then(|v| v.as_number())
            .ok_or_else(|| ValidationError::UnknownField(self.field.clone()))?;
        state.set_field(&self.field, FieldValue::Number(current + delta))
    }

    /// Schema check mirroring [`crate::condition::Condition::validate`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        let kind = field_kind(&self.field)
            .ok_or_else(|| ValidationError::UnknownField(self.field.clone()))?;

        let compatible = match &self.op {
            EffectOp::Set(value) => matches!(
                (value, kind),
                (FieldValue::Number(_), FieldKind::Percent)
                    | (FieldValue::Number(_), FieldKind::Number)
                    | (FieldValue::Flag(_), FieldKind::Flag)
                    | (FieldValue::Text(_), FieldKind::Text)
                    | (FieldValue::List(_), FieldKind::List)
            ),
            EffectOp::Increase(_) | EffectOp::Decrease(_) | EffectOp::Increment | EffectOp::Decrement => {
                matches!(kind, FieldKind::Percent | FieldKind::Number)
            }
            EffectOp::Add(_) | EffectOp::Remove(_) => matches!(kind, FieldKind::List),
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

/// Apply a full effect set atomically: either every effect applies and the
/// new state is returned, or the original state is left untouched.
pub fn apply_effects(state: &WorldState, effects: &[Effect]) -> Result<WorldState, ValidationError> {
    let mut next = state.clone();
    for effect in effects {
        effect.apply(&mut next)?;
    }
    Ok(next)
}
