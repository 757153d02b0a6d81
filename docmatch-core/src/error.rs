// docmatch-core/src/error.rs
//! Error taxonomy shared by the matcher, the expression evaluator and the
//! aggregation pipeline.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocMatchError {
    /// Malformed filter, expression or stage; unknown operator or stage name
    #[error("Invalid query shape: {0}")]
    QueryShape(String),

    /// Operator applied to a value of an incompatible type
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// Divide by zero, square root of a negative, modulo by zero
    #[error("Arithmetic error: {0}")]
    Arithmetic(String),

    /// Malformed `$group._id`
    #[error("Invalid group key: {0}")]
    GroupKey(String),

    /// Malformed `$jsonSchema`
    #[error("Invalid $jsonSchema: {0}")]
    JsonSchema(String),

    /// A caller-configured bound was exceeded
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failure inside a pipeline stage, tagged with its position
    #[error("Stage {index} ({stage}) failed: {source}")]
    Stage {
        index: usize,
        stage: String,
        #[source]
        source: Box<DocMatchError>,
    },
}

impl DocMatchError {
    /// Wrap an error with the stage that produced it.
    pub fn in_stage(self, index: usize, stage: &str) -> Self {
        DocMatchError::Stage {
            index,
            stage: stage.to_string(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping stage wrappers
    pub fn root_cause(&self) -> &DocMatchError {
        match self {
            DocMatchError::Stage { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Index of the failing stage, if the error came out of a pipeline
    pub fn stage_index(&self) -> Option<usize> {
        match self {
            DocMatchError::Stage { index, .. } => Some(*index),
            _ => None,
        }
    }

    pub fn is_type_mismatch(&self) -> bool {
        matches!(self.root_cause(), DocMatchError::TypeMismatch(_))
    }
}

pub type Result<T> = std::result::Result<T, DocMatchError>;
