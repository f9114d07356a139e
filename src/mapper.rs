//! Maps header columns onto canonical field keys and builds records.

use std::collections::BTreeSet;

use log::debug;

use crate::{
    coerce,
    record::CanonicalRecord,
    schema::{FieldKind, SchemaDescriptor},
};

#[derive(Debug, Clone)]
struct MappedColumn {
    index: usize,
    key: String,
    kind: FieldKind,
}

/// One mapped data row. `blank` holds the keys whose source cell was empty
/// after trimming and unquoting, whatever the coerced value became.
#[derive(Debug, Clone, Default)]
pub struct MappedRow {
    pub record: CanonicalRecord,
    pub blank: BTreeSet<String>,
}

impl MappedRow {
    pub fn is_blank(&self, key: &str) -> bool {
        self.blank.contains(key)
    }
}

/// Column positions resolved from one file's header row.
#[derive(Debug, Clone)]
pub struct HeaderMap {
    columns: Vec<MappedColumn>,
    width: usize,
}

impl HeaderMap {
    /// Resolves header cells against the schema's alias table. Returns `None`
    /// when no column is recognised.
    pub fn resolve(schema: &SchemaDescriptor, header: &[String]) -> Option<Self> {
        let mut columns: Vec<MappedColumn> = Vec::new();
        for (index, cell) in header.iter().enumerate() {
            match schema.resolve_alias(cell) {
                Some(key) => {
                    if let Some(previous) = columns.iter().find(|c| c.key == key) {
                        debug!(
                            "Columns {} and {} both map to '{key}'; using column {}",
                            previous.index + 1,
                            index + 1,
                            index + 1
                        );
                    }
                    columns.push(MappedColumn {
                        index,
                        key: key.to_string(),
                        kind: schema.classify(key),
                    });
                }
                None => debug!("Ignoring unmapped column '{}'", cell.trim()),
            }
        }
        if columns.is_empty() {
            return None;
        }
        Some(Self {
            columns,
            width: significant_width(header),
        })
    }

    /// Number of header cells, ignoring trailing empty ones.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn mapped_len(&self) -> usize {
        self.columns.len()
    }

    /// Canonical keys in column order, without duplicates.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            if !keys.contains(&column.key.as_str()) {
                keys.push(&column.key);
            }
        }
        keys
    }

    /// Builds a coerced record from one row. Missing trailing cells read as
    /// empty; when two columns share a key the later one wins.
    pub fn map_row(&self, cells: &[String]) -> MappedRow {
        let mut row = MappedRow::default();
        for column in &self.columns {
            let raw = cells.get(column.index).map(String::as_str).unwrap_or("");
            if coerce::clean_text(raw).is_empty() {
                row.blank.insert(column.key.clone());
            } else {
                row.blank.remove(&column.key);
            }
            row.record
                .insert(column.key.clone(), coerce::coerce_value(column.kind, raw));
        }
        row
    }
}

fn significant_width(header: &[String]) -> usize {
    header
        .iter()
        .rposition(|cell| !cell.trim().is_empty())
        .map_or(0, |idx| idx + 1)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rust_decimal::Decimal;

    use super::*;
    use crate::{
        record::CanonicalValue,
        schema::{Delimiter, SchemaDefinition},
    };

    fn schema() -> SchemaDescriptor {
        let mut fields = BTreeMap::new();
        fields.insert("sku".to_string(), vec!["Seller SKU".to_string()]);
        fields.insert("quantity".to_string(), vec!["Qty".to_string()]);
        fields.insert("order_id".to_string(), vec!["Order".to_string()]);
        SchemaDefinition {
            id: "orders".into(),
            label: String::new(),
            delimiter: Delimiter::Comma,
            extension: None,
            allows_multiple_files: true,
            signature: vec!["sku".into()],
            fields,
            required: Vec::new(),
            verbatim_dates: Vec::new(),
            numeric_tokens: None,
            date_tokens: None,
            row_filter: None,
        }
        .build()
        .unwrap()
    }

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn unknown_header_yields_none() {
        assert!(HeaderMap::resolve(&schema(), &cells(&["foo", "bar"])).is_none());
    }

    #[test]
    fn maps_and_coerces_known_columns() {
        let map = HeaderMap::resolve(&schema(), &cells(&["Seller SKU", "Notes", "Qty", "Order"]))
            .unwrap();
        assert_eq!(map.mapped_len(), 3);
        let record = map.map_row(&cells(&["A-1", "ignored", "1,200", "1.2E+3"])).record;
        assert_eq!(record.get("sku"), Some(&CanonicalValue::Text("A-1".into())));
        assert_eq!(
            record.get("quantity"),
            Some(&CanonicalValue::Number(Decimal::from(1200)))
        );
        assert_eq!(
            record.get("order_id"),
            Some(&CanonicalValue::Text("1200".into()))
        );
        assert!(record.get("notes").is_none());
    }

    #[test]
    fn short_rows_are_padded() {
        let map = HeaderMap::resolve(&schema(), &cells(&["sku", "qty"])).unwrap();
        let row = map.map_row(&cells(&["A-1"]));
        assert_eq!(
            row.record.get("quantity"),
            Some(&CanonicalValue::Number(Decimal::ZERO))
        );
        assert!(row.is_blank("quantity"));
        assert!(!row.is_blank("sku"));
    }

    #[test]
    fn later_duplicate_column_wins() {
        let map = HeaderMap::resolve(&schema(), &cells(&["sku", "Seller SKU"])).unwrap();
        assert_eq!(map.keys(), vec!["sku"]);
        let record = map.map_row(&cells(&["first", "second"])).record;
        assert_eq!(record.get("sku"), Some(&CanonicalValue::Text("second".into())));
    }

    #[test]
    fn blank_flag_follows_the_winning_column() {
        let map = HeaderMap::resolve(&schema(), &cells(&["qty", "Qty"])).unwrap();
        assert!(map.map_row(&cells(&["3", " "])).is_blank("quantity"));
        assert!(!map.map_row(&cells(&["", "\"4\""])).is_blank("quantity"));
    }

    #[test]
    fn trailing_empty_header_cells_do_not_count_toward_width() {
        let map = HeaderMap::resolve(&schema(), &cells(&["sku", "qty", ""])).unwrap();
        assert_eq!(map.width(), 2);
    }
}
