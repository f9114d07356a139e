//! Import schema model.
//!
//! A [`SchemaDescriptor`] describes one report type: its delimiter, the header
//! spellings it accepts, which canonical fields are required, how each field
//! is coerced, and an optional business filter. Descriptors are built from a
//! serialisable [`SchemaDefinition`] (the same shape used by YAML registry
//! overlays) and validated once at construction.
//!
//! ## Responsibilities
//!
//! - Alias table expansion and ambiguity detection
//! - Field classification (identifier, numeric, date, verbatim date, text)
//! - Header signature tokens used by the header locator
//! - Row filter definition and evaluation

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{error::RegistryError, expr, record::CanonicalRecord};

const DEFAULT_NUMERIC_TOKENS: &[&str] = &[
    "quantity",
    "qty",
    "price",
    "tax",
    "discount",
    "fee",
    "total",
    "amount",
    "cost",
    "units",
    "spend",
    "impressions",
    "clicks",
    "weight",
];

const DEFAULT_DATE_TOKENS: &[&str] = &["date", "timestamp"];

const IDENTIFIER_TOKEN: &str = "id";

const ALIAS_SEPARATORS: [char; 3] = ['-', '_', ' '];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delimiter {
    Comma,
    Tab,
}

impl Delimiter {
    pub fn as_byte(self) -> u8 {
        match self {
            Delimiter::Comma => b',',
            Delimiter::Tab => b'\t',
        }
    }

    pub fn as_char(self) -> char {
        self.as_byte() as char
    }

    pub fn default_extension(self) -> &'static str {
        match self {
            Delimiter::Comma => "csv",
            Delimiter::Tab => "txt",
        }
    }
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delimiter::Comma => write!(f, "comma"),
            Delimiter::Tab => write!(f, "tab"),
        }
    }
}

/// How a canonical field is coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Identifier,
    VerbatimDate,
    Number,
    Date,
    Text,
}

#[derive(Debug, Clone)]
pub struct FieldClassifier {
    numeric_tokens: Vec<String>,
    date_tokens: Vec<String>,
    verbatim_dates: BTreeSet<String>,
}

impl Default for FieldClassifier {
    fn default() -> Self {
        Self {
            numeric_tokens: DEFAULT_NUMERIC_TOKENS.iter().map(|t| t.to_string()).collect(),
            date_tokens: DEFAULT_DATE_TOKENS.iter().map(|t| t.to_string()).collect(),
            verbatim_dates: BTreeSet::new(),
        }
    }
}

impl FieldClassifier {
    pub fn new(
        numeric_tokens: Option<&[String]>,
        date_tokens: Option<&[String]>,
        verbatim_dates: &[String],
    ) -> Self {
        let mut classifier = Self::default();
        if let Some(tokens) = numeric_tokens {
            classifier.numeric_tokens = tokens.iter().map(|t| t.to_ascii_lowercase()).collect();
        }
        if let Some(tokens) = date_tokens {
            classifier.date_tokens = tokens.iter().map(|t| t.to_ascii_lowercase()).collect();
        }
        classifier.verbatim_dates = verbatim_dates.iter().map(|k| k.to_ascii_lowercase()).collect();
        classifier
    }

    /// Identifier keys win over everything else so long numeric ids are never
    /// pushed through numeric coercion.
    pub fn classify(&self, key: &str) -> FieldKind {
        let lowered = key.to_ascii_lowercase();
        if lowered.split('_').any(|token| token == IDENTIFIER_TOKEN) {
            FieldKind::Identifier
        } else if self.verbatim_dates.contains(&lowered) {
            FieldKind::VerbatimDate
        } else if self.numeric_tokens.iter().any(|t| lowered.contains(t.as_str())) {
            FieldKind::Number
        } else if self.date_tokens.iter().any(|t| lowered.contains(t.as_str())) {
            FieldKind::Date
        } else {
            FieldKind::Text
        }
    }
}

/// Post-mapping business rule deciding which records a schema keeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowFilter {
    /// Keep records whose `field` equals one of `values` (case-insensitive).
    AllowList { field: String, values: Vec<String> },
    /// Keep records for which the expression evaluates truthy.
    Expression { expression: String },
}

impl RowFilter {
    pub fn describe(&self) -> String {
        match self {
            RowFilter::AllowList { field, values } => {
                format!("{field} in [{}]", values.join(", "))
            }
            RowFilter::Expression { expression } => expression.clone(),
        }
    }

    pub fn matches(&self, record: &CanonicalRecord) -> bool {
        match self {
            RowFilter::AllowList { field, values } => record
                .get(field)
                .map(|value| value.as_display())
                .is_some_and(|value| {
                    let value = value.trim();
                    values.iter().any(|allowed| allowed.trim().eq_ignore_ascii_case(value))
                }),
            RowFilter::Expression { expression } => {
                match expr::evaluate_record_filter(expression, record) {
                    Ok(keep) => keep,
                    Err(err) => {
                        debug!("Row filter '{expression}' rejected record: {err:#}");
                        false
                    }
                }
            }
        }
    }

    fn validate(&self, schema: &str, known_fields: &BTreeSet<String>) -> Result<(), RegistryError> {
        match self {
            RowFilter::AllowList { field, values } => {
                if !known_fields.contains(field) {
                    return Err(RegistryError::InvalidFilter {
                        schema: schema.to_string(),
                        message: format!("field '{field}' is not defined by the schema"),
                    });
                }
                if values.iter().all(|v| v.trim().is_empty()) {
                    return Err(RegistryError::InvalidFilter {
                        schema: schema.to_string(),
                        message: format!("allow list for '{field}' is empty"),
                    });
                }
                Ok(())
            }
            RowFilter::Expression { expression } => {
                expr::validate_expression(expression).map_err(|err| RegistryError::InvalidFilter {
                    schema: schema.to_string(),
                    message: format!("{err:#}"),
                })
            }
        }
    }
}

/// Serialisable form of a schema, as written in registry overlay files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    pub delimiter: Delimiter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(default = "SchemaDefinition::default_allows_multiple_files")]
    pub allows_multiple_files: bool,
    pub signature: Vec<String>,
    /// Canonical field key -> accepted header spellings.
    pub fields: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verbatim_dates: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_tokens: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_tokens: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_filter: Option<RowFilter>,
}

impl SchemaDefinition {
    pub const fn default_allows_multiple_files() -> bool {
        true
    }

    pub fn build(self) -> Result<SchemaDescriptor, RegistryError> {
        SchemaDescriptor::from_definition(self)
    }
}

#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    definition: SchemaDefinition,
    aliases: HashMap<String, String>,
    signature: Vec<String>,
    classifier: FieldClassifier,
}

impl SchemaDescriptor {
    pub fn from_definition(definition: SchemaDefinition) -> Result<Self, RegistryError> {
        let id = definition.id.clone();
        let aliases = build_alias_table(&id, &definition.fields)?;

        let signature = definition
            .signature
            .iter()
            .map(|token| token.trim().to_lowercase())
            .filter(|token| !token.is_empty())
            .collect::<Vec<_>>();
        if signature.is_empty() {
            return Err(RegistryError::EmptySignature(id));
        }

        let known_fields = definition.fields.keys().cloned().collect::<BTreeSet<_>>();
        for field in &definition.required {
            if !known_fields.contains(field) {
                return Err(RegistryError::UnknownRequiredField {
                    schema: id,
                    field: field.clone(),
                });
            }
        }
        if let Some(filter) = &definition.row_filter {
            filter.validate(&id, &known_fields)?;
        }

        let classifier = FieldClassifier::new(
            definition.numeric_tokens.as_deref(),
            definition.date_tokens.as_deref(),
            &definition.verbatim_dates,
        );

        Ok(Self {
            definition,
            aliases,
            signature,
            classifier,
        })
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn label(&self) -> &str {
        if self.definition.label.is_empty() {
            &self.definition.id
        } else {
            &self.definition.label
        }
    }

    pub fn delimiter(&self) -> Delimiter {
        self.definition.delimiter
    }

    pub fn extension(&self) -> &str {
        self.definition
            .extension
            .as_deref()
            .unwrap_or_else(|| self.definition.delimiter.default_extension())
    }

    pub fn allows_multiple_files(&self) -> bool {
        self.definition.allows_multiple_files
    }

    pub fn required_fields(&self) -> &[String] {
        &self.definition.required
    }

    /// Lower-cased tokens that must all appear on the header line.
    pub fn signature(&self) -> &[String] {
        &self.signature
    }

    pub fn row_filter(&self) -> Option<&RowFilter> {
        self.definition.row_filter.as_ref()
    }

    pub fn definition(&self) -> &SchemaDefinition {
        &self.definition
    }

    pub fn field_keys(&self) -> impl Iterator<Item = &str> {
        self.definition.fields.keys().map(String::as_str)
    }

    /// Resolves a header cell to its canonical key, ignoring case.
    pub fn resolve_alias(&self, header: &str) -> Option<&str> {
        self.aliases
            .get(&normalize_header_token(header))
            .map(String::as_str)
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }

    pub fn classify(&self, key: &str) -> FieldKind {
        self.classifier.classify(key)
    }
}

/// Trims, strips a byte-order mark and one pair of surrounding quotes, and
/// lower-cases a header cell.
pub fn normalize_header_token(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches('\u{feff}').trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.trim().to_lowercase()
}

/// Spelling variants of an alias that differ only in word separators.
fn alias_variants(alias: &str) -> BTreeSet<String> {
    let normalized = normalize_header_token(alias);
    let mut variants = BTreeSet::new();
    if normalized.is_empty() {
        return variants;
    }
    if normalized.contains(ALIAS_SEPARATORS) {
        for sep in ALIAS_SEPARATORS {
            variants.insert(normalized.replace(ALIAS_SEPARATORS, &sep.to_string()));
        }
    }
    variants.insert(normalized);
    variants
}

fn build_alias_table(
    schema: &str,
    fields: &BTreeMap<String, Vec<String>>,
) -> Result<HashMap<String, String>, RegistryError> {
    let mut table: HashMap<String, String> = HashMap::new();
    for (key, spellings) in fields {
        let candidates = std::iter::once(key.as_str()).chain(spellings.iter().map(String::as_str));
        for alias in candidates.flat_map(alias_variants) {
            match table.get(&alias) {
                Some(existing) if existing != key => {
                    let (first, second) = if existing < key {
                        (existing.clone(), key.clone())
                    } else {
                        (key.clone(), existing.clone())
                    };
                    return Err(RegistryError::AmbiguousAlias {
                        schema: schema.to_string(),
                        alias,
                        first,
                        second,
                    });
                }
                Some(_) => {}
                None => {
                    table.insert(alias, key.clone());
                }
            }
        }
    }
    if table.is_empty() {
        return Err(RegistryError::EmptyAliasTable(schema.to_string()));
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(fields: &[(&str, &[&str])]) -> SchemaDefinition {
        SchemaDefinition {
            id: "test".into(),
            label: String::new(),
            delimiter: Delimiter::Comma,
            extension: None,
            allows_multiple_files: true,
            signature: vec!["sku".into()],
            fields: fields
                .iter()
                .map(|(key, aliases)| {
                    (
                        key.to_string(),
                        aliases.iter().map(|a| a.to_string()).collect(),
                    )
                })
                .collect(),
            required: Vec::new(),
            verbatim_dates: Vec::new(),
            numeric_tokens: None,
            date_tokens: None,
            row_filter: None,
        }
    }

    #[test]
    fn classify_prefers_identifier_tokens() {
        let classifier = FieldClassifier::new(None, None, &["posted_date_time".to_string()]);
        assert_eq!(classifier.classify("amazon_order_id"), FieldKind::Identifier);
        assert_eq!(classifier.classify("amount_paid"), FieldKind::Number);
        assert_eq!(classifier.classify("shipping_fees"), FieldKind::Number);
        assert_eq!(classifier.classify("posted_date_time"), FieldKind::VerbatimDate);
        assert_eq!(classifier.classify("purchase_date"), FieldKind::Date);
        assert_eq!(classifier.classify("sales_channel"), FieldKind::Text);
        assert_eq!(classifier.classify("width"), FieldKind::Text);
    }

    #[test]
    fn alias_variants_cover_separator_spellings() {
        let variants = alias_variants("Amazon-Order-ID");
        assert!(variants.contains("amazon-order-id"));
        assert!(variants.contains("amazon_order_id"));
        assert!(variants.contains("amazon order id"));
    }

    #[test]
    fn resolve_alias_ignores_case_and_quotes() {
        let schema = definition(&[("sku", &["Seller SKU", "SKU"])]).build().unwrap();
        assert_eq!(schema.resolve_alias("\"SELLER sku\""), Some("sku"));
        assert_eq!(schema.resolve_alias("seller_sku"), Some("sku"));
        assert_eq!(schema.resolve_alias("asin"), None);
    }

    #[test]
    fn conflicting_aliases_are_rejected() {
        let err = definition(&[("sku", &["item"]), ("title", &["Item"])])
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::AmbiguousAlias {
                schema: "test".into(),
                alias: "item".into(),
                first: "sku".into(),
                second: "title".into(),
            }
        );
    }

    #[test]
    fn duplicate_alias_for_same_key_is_accepted() {
        let schema = definition(&[("sku", &["SKU", "sku", "Sku"])]).build().unwrap();
        assert_eq!(schema.resolve_alias("SKU"), Some("sku"));
    }

    #[test]
    fn required_fields_must_be_defined() {
        let mut def = definition(&[("sku", &[])]);
        def.required = vec!["amount".into()];
        assert!(matches!(
            def.build(),
            Err(RegistryError::UnknownRequiredField { .. })
        ));
    }

    #[test]
    fn allow_list_matches_case_insensitively() {
        let filter = RowFilter::AllowList {
            field: "sales_channel".into(),
            values: vec!["Amazon.com".into()],
        };
        let mut record = CanonicalRecord::new();
        record.insert(
            "sales_channel",
            crate::record::CanonicalValue::Text(" amazon.COM ".into()),
        );
        assert!(filter.matches(&record));
        assert!(!filter.matches(&CanonicalRecord::new()));
    }
}
