//! Structural error taxonomy (spec §7).
//!
//! Structural errors abort a roll outright; evaluation warnings never
//! appear here (they are accumulated in [`crate::context::WarningFlags`]
//! and, when tracing is on, in the trace tree — see `engine::trace`).

use crate::validation::ValidationIssue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("table not found: {table} in collection {collection}")]
    TableNotFound { collection: String, table: String },

    #[error("template not found: {template} in collection {collection}")]
    TemplateNotFound { collection: String, template: String },

    #[error("recursion limit exceeded (depth {limit}) while rolling {table}")]
    RecursionLimitExceeded { table: String, limit: u32 },

    #[error("inheritance depth exceeded (depth {limit}) while resolving {table}")]
    InheritanceDepthExceeded { table: String, limit: u32 },

    #[error("table {table} extends {parent}, which is not a simple table")]
    InheritanceParentNotSimple { table: String, parent: String },

    #[error("shared variable '{name}' shadows a document-level or static variable")]
    SharedVariableShadowed { name: String },

    #[error("document failed validation: {0:?}")]
    ValidationFailed(Vec<ValidationIssue>),
}

pub type EngineResult<T> = Result<T, EngineError>;
