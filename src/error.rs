//! Error taxonomy for the ingestion engine.
//!
//! [`IngestError`] covers everything that can abort a batch job. Every
//! variant carries enough context (file name, schema id, row number) to be
//! shown to an operator verbatim. [`RegistryError`] is raised while building
//! the schema catalogue and never during a job.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(
        "{file}: no header row found in the first {window} line(s) for schema '{schema}' (expected {expected})"
    )]
    HeaderNotFound {
        file: String,
        schema: String,
        window: usize,
        expected: String,
    },

    #[error("{file}: none of the header columns are recognised by schema '{schema}'")]
    FieldMapping { file: String, schema: String },

    #[error("{file}: row {row} could not be parsed for schema '{schema}': {message}")]
    RowParse {
        file: String,
        schema: String,
        row: usize,
        message: String,
    },

    #[error("{file}: row {row} is missing required field '{field}' for schema '{schema}'")]
    RequiredFieldMissing {
        file: String,
        schema: String,
        row: usize,
        field: String,
    },

    #[error(
        "{file}: all {removed} record(s) were excluded by the '{schema}' business rule ({rule})"
    )]
    BusinessRuleFilterEmpty {
        file: String,
        schema: String,
        removed: usize,
        rule: String,
    },

    #[error("{file}: failed to read file: {message}")]
    FileRead { file: String, message: String },

    #[error("{file}: expected a .{expected} file for schema '{schema}'")]
    UnsupportedFileType {
        file: String,
        schema: String,
        expected: String,
    },

    #[error("schema '{schema}' accepts a single file per upload but {count} were selected")]
    MultipleFilesNotAllowed { schema: String, count: usize },

    #[error("no files were selected for schema '{schema}'")]
    EmptyBatch { schema: String },

    #[error("unknown schema '{0}'")]
    UnknownSchema(String),

    #[error("batch cancelled before {file} ({processed} of {total} file(s) processed)")]
    Cancelled {
        file: String,
        processed: usize,
        total: usize,
    },

    #[error("submission of {records} record(s) for schema '{schema}' failed: {message}")]
    Submission {
        schema: String,
        records: usize,
        message: String,
    },

    #[error("{} file error(s); first: {}", .0.len(), first_message(.0))]
    Multiple(Vec<IngestError>),
}

fn first_message(errors: &[IngestError]) -> String {
    errors
        .first()
        .map(|err| err.to_string())
        .unwrap_or_default()
}

impl IngestError {
    /// Name of the file the error is attributed to, if any.
    pub fn file(&self) -> Option<&str> {
        match self {
            IngestError::HeaderNotFound { file, .. }
            | IngestError::FieldMapping { file, .. }
            | IngestError::RowParse { file, .. }
            | IngestError::RequiredFieldMissing { file, .. }
            | IngestError::BusinessRuleFilterEmpty { file, .. }
            | IngestError::FileRead { file, .. }
            | IngestError::UnsupportedFileType { file, .. }
            | IngestError::Cancelled { file, .. } => Some(file),
            IngestError::Multiple(errors) => errors.first().and_then(|err| err.file()),
            _ => None,
        }
    }

    /// True for failures that happened after parsing succeeded, while handing
    /// records to the downstream sink.
    pub fn is_submission_failure(&self) -> bool {
        matches!(self, IngestError::Submission { .. })
    }
}

pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("schema '{0}' is registered more than once")]
    DuplicateSchema(String),

    #[error("schema '{schema}': alias '{alias}' maps to both '{first}' and '{second}'")]
    AmbiguousAlias {
        schema: String,
        alias: String,
        first: String,
        second: String,
    },

    #[error("schema '{0}' does not define any header aliases")]
    EmptyAliasTable(String),

    #[error("schema '{schema}': required field '{field}' is not reachable from any alias")]
    UnknownRequiredField { schema: String, field: String },

    #[error("schema '{0}' does not define any header signature tokens")]
    EmptySignature(String),

    #[error("schema '{schema}': invalid row filter: {message}")]
    InvalidFilter { schema: String, message: String },

    #[error("{origin}: invalid schema definitions: {message}")]
    Definition { origin: String, message: String },
}
