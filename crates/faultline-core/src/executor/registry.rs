//! Executor registry -- maps task kinds to their executors.
//!
//! The consumer looks executors up here at dispatch time; adding a task
//! kind means registering another executor, the consumer never changes.

use std::collections::HashMap;

use faultline_db::models::TaskKind;

use super::Executor;

/// A collection of registered [`Executor`] implementations, keyed by
/// the task kind they handle.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<TaskKind, Box<dyn Executor>>,
}

impl ExecutorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under its own kind.
    ///
    /// A previously registered executor for the same kind is replaced
    /// and returned.
    pub fn register(&mut self, executor: impl Executor + 'static) -> Option<Box<dyn Executor>> {
        self.executors.insert(executor.kind(), Box::new(executor))
    }

    /// Look up the executor for a task kind.
    pub fn get(&self, kind: TaskKind) -> Option<&dyn Executor> {
        self.executors.get(&kind).map(|b| b.as_ref())
    }

    /// The kinds with a registered executor.
    pub fn kinds(&self) -> Vec<TaskKind> {
        let mut kinds: Vec<_> = self.executors.keys().copied().collect();
        kinds.sort_by_key(|k| k.to_string());
        kinds
    }

    /// Registry with all six pipeline executors.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(super::build_container::BuildContainerExecutor);
        registry.register(super::restart_pedestal::RestartPedestalExecutor);
        registry.register(super::fault_injection::FaultInjectionExecutor);
        registry.register(super::build_datapack::BuildDatapackExecutor);
        registry.register(super::run_algorithm::RunAlgorithmExecutor);
        registry.register(super::collect_result::CollectResultExecutor);
        registry
    }
}
