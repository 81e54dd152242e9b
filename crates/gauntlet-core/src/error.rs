use thiserror::Error;

/// Validation failures raised when registering actions, goals, or conditions.
///
/// These are the `invalid_input` class of errors: they are fatal at
/// registration time and surfaced to the caller immediately. Nothing in this
/// enum is produced during planning; a registered catalog is always
/// internally consistent.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("unknown state field '{0}'")]
    UnknownField(String),

    #[error("operator '{op}' is not valid for field '{field}' of kind {kind}")]
    OperatorMismatch {
        field: String,
        op: String,
        kind: String,
    },

    #[error("invalid regex pattern '{pattern}' for field '{field}': {message}")]
    InvalidPattern {
        field: String,
        pattern: String,
        message: String,
    },

    #[error("'{value}' is not a valid value for field '{field}'")]
    InvalidEnumValue { field: String, value: String },

    #[error("action '{id}' cost must be positive, got {cost}")]
    NonPositiveCost { id: String, cost: f64 },

    #[error("action '{id}' success rate must be within [0, 1], got {rate}")]
    SuccessRateOutOfRange { id: String, rate: f64 },

    #[error("action '{0}' has no effects")]
    EmptyEffects(String),

    #[error("goal '{0}' has no conditions")]
    EmptyGoal(String),

    #[error("identifier must not be empty")]
    EmptyId,

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Failures from the narrow dispatch seam that hands actions to executors.
///
/// The core never executes actions itself; collaborators implementing
/// [`crate::executor::ActionDispatch`] report failures through this type so
/// replanning can be triggered on `PreconditionUnmet`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("action '{0}' is not registered")]
    ActionUnknown(String),

    #[error("no executor of type '{0}' is available")]
    ExecutorUnavailable(String),

    #[error("preconditions for action '{0}' no longer hold")]
    PreconditionUnmet(String),

    #[error("action '{action_id}' failed: {message}")]
    Failed { action_id: String, message: String },
}
