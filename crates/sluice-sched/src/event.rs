use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Cron,
    FileWatch,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cron => f.write_str("cron"),
            Self::FileWatch => f.write_str("file_watch"),
        }
    }
}

/// A trigger firing for a DAG. `files` is non-empty only for file-arrival
/// events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    pub dag_name: String,
    pub source: EventSource,
    pub files: Vec<String>,
}

impl TriggerEvent {
    pub fn cron(dag_name: impl Into<String>) -> Self {
        Self {
            dag_name: dag_name.into(),
            source: EventSource::Cron,
            files: Vec::new(),
        }
    }

    pub fn file_watch(dag_name: impl Into<String>, files: Vec<String>) -> Self {
        Self {
            dag_name: dag_name.into(),
            source: EventSource::FileWatch,
            files,
        }
    }
}
