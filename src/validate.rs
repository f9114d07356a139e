//! Required-field checks and business filtering of mapped records.

use log::debug;

use crate::{
    error::{IngestError, IngestResult},
    mapper::MappedRow,
    record::CanonicalRecord,
    schema::SchemaDescriptor,
};

/// First required field (in schema order) that is absent, or whose source
/// cell was empty. A blank numeric cell coerces to zero but is still missing.
pub fn missing_required<'a>(schema: &'a SchemaDescriptor, row: &MappedRow) -> Option<&'a str> {
    schema
        .required_fields()
        .iter()
        .map(String::as_str)
        .find(|field| row.is_blank(field) || !row.record.has_value(field))
}

pub fn check_required(
    schema: &SchemaDescriptor,
    file: &str,
    row: usize,
    mapped: &MappedRow,
) -> IngestResult<()> {
    match missing_required(schema, mapped) {
        Some(field) => Err(IngestError::RequiredFieldMissing {
            file: file.to_string(),
            schema: schema.id().to_string(),
            row,
            field: field.to_string(),
        }),
        None => Ok(()),
    }
}

#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub kept: Vec<CanonicalRecord>,
    pub removed: usize,
}

/// Applies the schema's row filter to a whole file's records. A filter that
/// removes every record of a non-empty set is an error.
pub fn apply_row_filter(
    schema: &SchemaDescriptor,
    file: &str,
    records: Vec<CanonicalRecord>,
) -> IngestResult<FilterOutcome> {
    let Some(filter) = schema.row_filter() else {
        return Ok(FilterOutcome {
            kept: records,
            removed: 0,
        });
    };

    let total = records.len();
    let kept = records
        .into_iter()
        .filter(|record| filter.matches(record))
        .collect::<Vec<_>>();
    let removed = total - kept.len();
    debug!("{file}: row filter kept {} of {total} record(s)", kept.len());

    if kept.is_empty() && removed > 0 {
        return Err(IngestError::BusinessRuleFilterEmpty {
            file: file.to_string(),
            schema: schema.id().to_string(),
            removed,
            rule: filter.describe(),
        });
    }
    Ok(FilterOutcome { kept, removed })
}
