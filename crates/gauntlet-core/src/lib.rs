//! # Gauntlet Core
//!
//! Shared model types for the quality-engineering fleet's planning core:
//! the symbolic world state, the condition and effect operators over it, the
//! action and goal catalogs, and the narrow contracts the planner consumes
//! from the outside world (executor registry, action dispatch).
//!
//! Everything here is pure data and validation. Registration of actions and
//! goals is the only place `invalid_input` errors can arise; once a catalog
//! is registered it is internally consistent and the planner never has to
//! re-check field names or operator compatibility.

pub mod action;
pub mod condition;
pub mod config;
pub mod effect;
pub mod error;
pub mod executor;
pub mod goal;
pub mod state;

pub use action::{default_catalog, Action, ActionBuilder, ActionCategory, ActionRegistry};
pub use condition::{satisfies, Condition, ConditionOp};
pub use config::{FleetConfig, PrivacyLevel, ProviderKind};
pub use effect::{apply_effects, Effect, EffectOp};
pub use error::{DispatchError, ValidationError};
pub use executor::{
    ActionDispatch, ExecutorInfo, ExecutorRegistry, ExecutorStatus, StaticExecutorRegistry,
};
pub use goal::{default_goals, Goal, GoalBuilder, GoalCustomization, GoalRegistry};
pub use state::{
    field_kind, is_measurement_flag, schema, ChangeSize, ContextState, CoverageState, Environment,
    FieldKind, FieldSpec, FieldValue, FleetState, GateStatus, QualityState, ResourceState,
    RiskLevel, WorldState,
};
