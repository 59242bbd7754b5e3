use serde_json::json;
use thiserror::Error;

/// Which input table a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Student,
    Classroom,
    Teacher,
}

impl Entity {
    pub fn as_str(self) -> &'static str {
        match self {
            Entity::Student => "student",
            Entity::Classroom => "classroom",
            Entity::Teacher => "teacher",
        }
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised before any seat is assigned. Allocation never fails halfway.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// The input set cannot be allocated at all (no teachers).
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A single record is malformed.
    #[error("invalid {entity} #{index}{}: {message}", id_suffix(.id))]
    Validation {
        entity: Entity,
        index: usize,
        id: Option<String>,
        message: String,
    },

    /// A free-form parameter (search mode, export format) is not recognised.
    #[error("invalid {field}: {message}")]
    InvalidParam { field: &'static str, message: String },

    #[error("too many students: {count} exceeds the limit of {limit}")]
    TooManyStudents { count: usize, limit: usize },
}

fn id_suffix(id: &Option<String>) -> String {
    match id {
        Some(s) => format!(" ({s})"),
        None => String::new(),
    }
}

impl AllocError {
    pub fn no_teachers() -> Self {
        AllocError::Configuration {
            message: "at least one teacher is required".to_string(),
        }
    }

    pub fn invalid(
        entity: Entity,
        index: usize,
        id: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        AllocError::Validation {
            entity,
            index,
            id: id.map(str::to_string),
            message: message.into(),
        }
    }

    /// IPC error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            AllocError::Configuration { .. } => "configuration_error",
            AllocError::Validation { .. }
            | AllocError::InvalidParam { .. }
            | AllocError::TooManyStudents { .. } => "validation_error",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AllocError::Configuration { .. } => None,
            AllocError::Validation {
                entity, index, id, ..
            } => Some(json!({
                "entity": entity.as_str(),
                "index": index,
                "id": id,
            })),
            AllocError::InvalidParam { field, .. } => Some(json!({ "field": field })),
            AllocError::TooManyStudents { count, limit } => {
                Some(json!({ "count": count, "limit": limit }))
            }
        }
    }
}
