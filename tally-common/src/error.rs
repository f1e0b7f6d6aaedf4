use crate::template::{Backend, BindError};

/// Error name the distributed engine reports when its Hive metastore is contended.
pub const HIVE_METASTORE_ERROR: &str = "HIVE_METASTORE_ERROR";

/// Failure reported by a backend collaborator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// Metastore contention on the distributed engine. Worth retrying.
    #[error("{backend} transient error {name}: {message}")]
    Transient {
        backend: Backend,
        name: String,
        message: String,
    },

    /// Anything else: SQL errors, connectivity, protocol errors.
    #[error("{backend} execution error: {message}")]
    Execution {
        backend: Backend,
        name: Option<String>,
        message: String,
    },
}

impl BackendError {
    pub fn execution(backend: Backend, message: impl Into<String>) -> Self {
        BackendError::Execution {
            backend,
            name: None,
            message: message.into(),
        }
    }

    /// Classify an engine error by its reported name.
    pub fn from_engine(backend: Backend, name: Option<&str>, message: impl Into<String>) -> Self {
        match name {
            Some(HIVE_METASTORE_ERROR) => BackendError::Transient {
                backend,
                name: HIVE_METASTORE_ERROR.to_string(),
                message: message.into(),
            },
            other => BackendError::Execution {
                backend,
                name: other.map(str::to_string),
                message: message.into(),
            },
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient { .. })
    }

    pub fn backend(&self) -> Backend {
        match self {
            BackendError::Transient { backend, .. } | BackendError::Execution { backend, .. } => {
                *backend
            }
        }
    }

    /// Prefix the message with the failing part of a multi-statement template.
    pub fn in_part(self, index: usize, total: usize) -> Self {
        if total <= 1 {
            return self;
        }
        match self {
            BackendError::Transient {
                backend,
                name,
                message,
            } => BackendError::Transient {
                backend,
                name,
                message: format!("part {}/{}: {}", index + 1, total, message),
            },
            BackendError::Execution {
                backend,
                name,
                message,
            } => BackendError::Execution {
                backend,
                name,
                message: format!("part {}/{}: {}", index + 1, total, message),
            },
        }
    }
}

/// What went wrong inside a failing stage.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionCause {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Parameters(#[from] BindError),

    #[error("malformed date {value:?} in column {column}")]
    RowDate { column: String, value: String },
}

/// Orchestrator failure surfaced to the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    /// Raised before any work begins (unsupported compression, unknown provider type...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Metastore contention that outlived the retry budget. `context` names the unfinished work.
    #[error("stage {stage} gave up after {attempts} attempt(s): {source}")]
    TransientBackend {
        stage: String,
        context: serde_json::Value,
        attempts: u32,
        #[source]
        source: BackendError,
    },

    /// Not retried. `context` carries the bound parameters so the caller can retry the stage wholesale.
    #[error("stage {stage} failed: {cause}")]
    StatementExecution {
        stage: String,
        context: serde_json::Value,
        #[source]
        cause: ExecutionCause,
    },
}

impl SummaryError {
    pub fn statement(
        stage: impl Into<String>,
        context: serde_json::Value,
        cause: impl Into<ExecutionCause>,
    ) -> Self {
        SummaryError::StatementExecution {
            stage: stage.into(),
            context,
            cause: cause.into(),
        }
    }

    /// Map a backend failure: transient errors become `TransientBackend`, the rest `StatementExecution`.
    pub fn from_backend(
        stage: impl Into<String>,
        context: serde_json::Value,
        err: BackendError,
        attempts: u32,
    ) -> Self {
        if err.is_transient() {
            SummaryError::TransientBackend {
                stage: stage.into(),
                context,
                attempts,
                source: err,
            }
        } else {
            SummaryError::statement(stage, context, err)
        }
    }

    /// Record the enclosing pipeline stage in the error context.
    pub fn within(mut self, pipeline_stage: &str) -> Self {
        if let SummaryError::TransientBackend { context, .. }
        | SummaryError::StatementExecution { context, .. } = &mut self
        {
            if let Some(obj) = context.as_object_mut() {
                obj.insert("pipeline_stage".to_string(), serde_json::json!(pipeline_stage));
            }
        }
        self
    }

    pub fn context(&self) -> Option<&serde_json::Value> {
        match self {
            SummaryError::Configuration(_) => None,
            SummaryError::TransientBackend { context, .. }
            | SummaryError::StatementExecution { context, .. } => Some(context),
        }
    }

    pub fn stage(&self) -> Option<&str> {
        match self {
            SummaryError::Configuration(_) => None,
            SummaryError::TransientBackend { stage, .. }
            | SummaryError::StatementExecution { stage, .. } => Some(stage),
        }
    }
}
