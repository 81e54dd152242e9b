//! # Gauntlet Planner
//!
//! Goal-oriented action planning for the quality-engineering fleet:
//! A* search from a measured [`gauntlet_core::WorldState`] to a state
//! satisfying a goal's conditions, plus the builder that assembles world
//! states from metrics and fleet snapshots, and the compiler that turns a
//! linear plan into a dependency-annotated workflow DAG.
//!
//! All three components are pure: they never perform I/O, never log, and
//! return typed failures. Long searches are bounded by iteration and time
//! budgets and can be cancelled cooperatively.

pub mod builder;
pub mod compiler;
mod heuristic;
pub mod plan;
pub mod planner;

pub use builder::{
    performance_score, security_score, ContextSeed, QualitySnapshot, ResourceBudget,
    WorldStateBuilder,
};
pub use compiler::{
    CompileError, StepStatus, StepType, WorkflowCompiler, WorkflowStep, WorkflowStrategy,
};
pub use plan::{NoPlanReason, Plan, PlanError, PlanStatus};
pub use planner::{CancelToken, GoapPlanner, PlanConstraints};
