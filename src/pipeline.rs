//! Single-file parse pipeline: locate header, decode rows, map, coerce,
//! validate and filter.

use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    decoder::{self, RawRow},
    error::{IngestError, IngestResult},
    header::{self, HEADER_SCAN_WINDOW},
    mapper::HeaderMap,
    record::CanonicalRecord,
    schema::{Delimiter, SchemaDescriptor},
    validate,
};

/// Per-file statistics reported after a successful parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub file: String,
    /// 1-based line of the header row.
    pub header_line: usize,
    pub records: usize,
    /// Tab-mode rows dropped for a column-count mismatch.
    pub skipped_rows: usize,
    /// Records removed by the schema's business filter.
    pub filtered_rows: usize,
}

#[derive(Debug)]
pub struct ParsedFile {
    pub report: FileReport,
    pub records: Vec<CanonicalRecord>,
}

/// Parses one decoded file against `schema`.
pub fn parse_file(
    schema: &SchemaDescriptor,
    file: &str,
    text: &str,
    strict_columns: bool,
) -> IngestResult<ParsedFile> {
    let location = header::locate_header(text, schema.signature(), HEADER_SCAN_WINDOW)
        .ok_or_else(|| header_not_found(schema, file))?;
    debug!("{file}: header found on line {}", location.line);

    let rows = decoder::decode(&text[location.offset..], schema.delimiter(), location.line)
        .map_err(|err| IngestError::RowParse {
            file: file.to_string(),
            schema: schema.id().to_string(),
            row: err.record,
            message: err.to_string(),
        })?;
    let Some((header_row, data_rows)) = rows.split_first() else {
        return Err(header_not_found(schema, file));
    };

    let map = HeaderMap::resolve(schema, &header_row.cells).ok_or_else(|| {
        IngestError::FieldMapping {
            file: file.to_string(),
            schema: schema.id().to_string(),
        }
    })?;
    debug!("{file}: mapped columns {:?}", map.keys());

    let mut records = Vec::with_capacity(data_rows.len());
    let mut skipped_rows = 0;
    for (idx, row) in data_rows.iter().enumerate() {
        let row_number = idx + 1;
        if schema.delimiter() == Delimiter::Tab && is_ragged(row, map.width()) {
            if strict_columns {
                return Err(IngestError::RowParse {
                    file: file.to_string(),
                    schema: schema.id().to_string(),
                    row: row_number,
                    message: format!(
                        "expected {} column(s) but found {}",
                        map.width(),
                        row.cells.len()
                    ),
                });
            }
            warn!(
                "{file}: skipping row {row_number} (line {}): expected {} column(s) but found {}",
                row.line,
                map.width(),
                row.cells.len()
            );
            skipped_rows += 1;
            continue;
        }
        let mapped = map.map_row(&row.cells);
        validate::check_required(schema, file, row_number, &mapped)?;
        records.push(mapped.record);
    }

    if data_rows.is_empty() {
        warn!("{file}: header found but the file contains no data rows");
    }

    let outcome = validate::apply_row_filter(schema, file, records)?;
    let report = FileReport {
        file: file.to_string(),
        header_line: location.line,
        records: outcome.kept.len(),
        skipped_rows,
        filtered_rows: outcome.removed,
    };
    info!(
        "{file}: {} record(s), {} skipped, {} filtered",
        report.records, report.skipped_rows, report.filtered_rows
    );
    Ok(ParsedFile {
        report,
        records: outcome.kept,
    })
}

/// A tab row is ragged when it is shorter than the header or carries
/// non-empty cells past the header's last column.
fn is_ragged(row: &RawRow, width: usize) -> bool {
    row.cells.len() < width || row.significant_len() > width
}

fn header_not_found(schema: &SchemaDescriptor, file: &str) -> IngestError {
    IngestError::HeaderNotFound {
        file: file.to_string(),
        schema: schema.id().to_string(),
        window: HEADER_SCAN_WINDOW,
        expected: schema.signature().join(", "),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rust_decimal::Decimal;

    use super::*;
    use crate::{
        record::CanonicalValue,
        schema::{RowFilter, SchemaDefinition},
    };

    fn schema(delimiter: Delimiter) -> SchemaDescriptor {
        let mut fields = BTreeMap::new();
        fields.insert("sku".to_string(), vec!["Seller SKU".to_string()]);
        fields.insert("quantity".to_string(), vec!["Qty".to_string()]);
        fields.insert("customer".to_string(), Vec::new());
        fields.insert("channel".to_string(), Vec::new());
        SchemaDefinition {
            id: "orders".into(),
            label: String::new(),
            delimiter,
            extension: None,
            allows_multiple_files: true,
            signature: vec!["sku".into(), "qty".into()],
            fields,
            required: vec!["sku".into()],
            verbatim_dates: Vec::new(),
            numeric_tokens: None,
            date_tokens: None,
            row_filter: Some(RowFilter::AllowList {
                field: "channel".into(),
                values: vec!["web".into()],
            }),
        }
        .build()
        .unwrap()
    }

    #[test]
    fn parses_comma_file_with_preamble() {
        let text = "Report generated 2024-01-01\n\nSKU,Qty,Customer,Channel\nA1,\"1,200\",\"Jones, Inc.\",web\nB2,3,Smith,store\n";
        let parsed = parse_file(&schema(Delimiter::Comma), "orders.csv", text, false).unwrap();
        assert_eq!(parsed.report.header_line, 3);
        assert_eq!(parsed.report.records, 1);
        assert_eq!(parsed.report.filtered_rows, 1);
        let record = &parsed.records[0];
        assert_eq!(
            record.get("customer"),
            Some(&CanonicalValue::Text("Jones, Inc.".into()))
        );
        assert_eq!(
            record.get("quantity"),
            Some(&CanonicalValue::Number(Decimal::from(1200)))
        );
    }

    #[test]
    fn ragged_tab_rows_are_skipped_or_rejected() {
        let text = "sku\tqty\tchannel\nA1\t2\tweb\nB2\t1\nC3\t4\tweb\t\t\n";
        let parsed = parse_file(&schema(Delimiter::Tab), "orders.txt", text, false).unwrap();
        assert_eq!(parsed.report.records, 2);
        assert_eq!(parsed.report.skipped_rows, 1);

        let err = parse_file(&schema(Delimiter::Tab), "orders.txt", text, true).unwrap_err();
        assert!(matches!(err, IngestError::RowParse { row: 2, .. }));
    }

    #[test]
    fn missing_required_value_fails_with_row_number() {
        let text = "sku,qty,channel\nA1,1,web\n,2,web\n";
        let err = parse_file(&schema(Delimiter::Comma), "orders.csv", text, false).unwrap_err();
        assert!(matches!(
            err,
            IngestError::RequiredFieldMissing { row: 2, ref file, .. } if file == "orders.csv"
        ));
    }

    #[test]
    fn unrecognised_header_is_a_mapping_error() {
        let text = "sku qty summary\nfoo,bar\n";
        let err = parse_file(&schema(Delimiter::Comma), "orders.csv", text, false).unwrap_err();
        assert!(matches!(err, IngestError::FieldMapping { .. }));
    }

    #[test]
    fn header_only_file_yields_no_records() {
        let parsed =
            parse_file(&schema(Delimiter::Comma), "orders.csv", "sku,qty,channel\n", false)
                .unwrap();
        assert!(parsed.records.is_empty());
        assert_eq!(parsed.report.records, 0);
    }

    #[test]
    fn missing_header_reports_the_window() {
        let err = parse_file(&schema(Delimiter::Comma), "orders.csv", "a,b\n1,2\n", false)
            .unwrap_err();
        assert!(matches!(err, IngestError::HeaderNotFound { window: 10, .. }));
    }

    #[test]
    fn blank_required_amount_is_not_booked_as_zero() {
        let registry = crate::registry::SchemaRegistry::builtin().unwrap();
        let schema = registry.get("ad_billing").unwrap();
        let text = "Invoice Date,Invoice Number,Amount\n2024-05-03,INV-1,\n";
        let err = parse_file(schema, "billing.csv", text, false).unwrap_err();
        assert!(matches!(
            err,
            IngestError::RequiredFieldMissing { row: 1, ref field, .. } if field == "amount"
        ));
    }

    #[test]
    fn trailing_tab_on_header_does_not_make_rows_ragged() {
        let text = "sku\tqty\tchannel\t\nA1\t2\tweb\nB2\t1\tweb\t\n";
        let parsed = parse_file(&schema(Delimiter::Tab), "orders.txt", text, true).unwrap();
        assert_eq!(parsed.report.records, 2);
        assert_eq!(parsed.report.skipped_rows, 0);
    }
}
