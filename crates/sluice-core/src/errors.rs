use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DagError {
    #[error("dependency cycle detected involving tasks: {}", tasks.join(", "))]
    CycleDetected { tasks: Vec<String> },
    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },
    #[error("duplicate task name: {0}")]
    DuplicateTask(String),
}
