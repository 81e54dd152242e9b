use serde::{Deserialize, Serialize};

use crate::effect::Effect;
use crate::error::DispatchError;

/// Lifecycle status of an external executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorStatus {
    Idle,
    Busy,
    Available,
    Running,
}

impl ExecutorStatus {
    /// Idle and available executors can take new work immediately.
    pub fn can_accept_work(&self) -> bool {
        matches!(self, ExecutorStatus::Idle | ExecutorStatus::Available)
    }
}

/// Registry view of one executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub id: String,
    pub executor_type: String,
    pub status: ExecutorStatus,
}

/// The only integration surface the planner needs from whatever system runs
/// agents. Implementations live outside the core.
pub trait ExecutorRegistry: Send + Sync {
    fn supported_types(&self) -> Vec<String>;
    fn all(&self) -> Vec<ExecutorInfo>;
    fn by_type(&self, executor_type: &str) -> Vec<ExecutorInfo>;
}

/// Narrow dispatch seam: hand a registered action to an executor and get the
/// observed effect deltas back. Agent bodies implement this; the core only
/// consumes the contract.
pub trait ActionDispatch: Send + Sync {
    fn run_action(
        &self,
        action_id: &str,
        inputs: &serde_json::Value,
    ) -> Result<Vec<Effect>, DispatchError>;
}

/// In-memory registry for tests and fixed-fleet deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticExecutorRegistry {
    executors: Vec<ExecutorInfo>,
}

impl StaticExecutorRegistry {
    pub fn new(executors: Vec<ExecutorInfo>) -> Self {
        Self { executors }
    }

    pub fn with_executor(
        mut self,
        id: impl Into<String>,
        executor_type: impl Into<String>,
        status: ExecutorStatus,
    ) -> Self {
        self.executors.push(ExecutorInfo {
            id: id.into(),
            executor_type: executor_type.into(),
            status,
        });
        self
    }
}

impl ExecutorRegistry for StaticExecutorRegistry {
    fn supported_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .executors
            .iter()
            .map(|e| e.executor_type.clone())
            .collect();
        types.sort();
        types.dedup();
        types
    }

    fn all(&self) -> Vec<ExecutorInfo> {
        self.executors.clone()
    }

    fn by_type(&self, executor_type: &str) -> Vec<ExecutorInfo> {
        self.executors
            .iter()
            .filter(|e| e.executor_type == executor_type)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> StaticExecutorRegistry {
        StaticExecutorRegistry::default()
            .with_executor("exec-1", "test-executor", ExecutorStatus::Idle)
            .with_executor("exec-2", "test-executor", ExecutorStatus::Busy)
            .with_executor("exec-3", "coverage-analyzer", ExecutorStatus::Available)
    }

    #[test]
    fn test_supported_types_deduplicates() {
        assert_eq!(
            registry().supported_types(),
            vec!["coverage-analyzer".to_string(), "test-executor".to_string()]
        );
    }

    #[test]
    fn test_by_type() {
        let by_type = registry().by_type("test-executor");
        assert_eq!(by_type.len(), 2);
        assert!(by_type.iter().all(|e| e.executor_type == "test-executor"));
    }

    #[test]
    fn test_can_accept_work() {
        assert!(ExecutorStatus::Idle.can_accept_work());
        assert!(ExecutorStatus::Available.can_accept_work());
        assert!(!ExecutorStatus::Busy.can_accept_work());
        assert!(!ExecutorStatus::Running.can_accept_work());
    }
}
