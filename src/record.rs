use std::{collections::BTreeMap, fmt};

use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Serialize, Serializer};

/// A single coerced field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalValue {
    Number(Decimal),
    Text(String),
    /// Normalised ISO date or date-time, or a verbatim source timestamp.
    Date(String),
}

impl CanonicalValue {
    pub fn as_display(&self) -> String {
        match self {
            CanonicalValue::Number(n) => n.normalize().to_string(),
            CanonicalValue::Text(s) | CanonicalValue::Date(s) => s.clone(),
        }
    }

    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            CanonicalValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CanonicalValue::Text(s) | CanonicalValue::Date(s) => Some(s),
            CanonicalValue::Number(_) => None,
        }
    }

    /// Numbers always count as present; text and dates must be non-blank.
    /// Blank numeric cells are caught by the mapper before coercion.
    pub fn is_present(&self) -> bool {
        match self {
            CanonicalValue::Number(_) => true,
            CanonicalValue::Text(s) | CanonicalValue::Date(s) => !s.trim().is_empty(),
        }
    }
}

impl fmt::Display for CanonicalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

impl Serialize for CanonicalValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            CanonicalValue::Number(n) => match n.to_f64() {
                Some(value) if value.is_finite() => serializer.serialize_f64(value),
                _ => serializer.serialize_str(&n.normalize().to_string()),
            },
            CanonicalValue::Text(s) | CanonicalValue::Date(s) => serializer.serialize_str(s),
        }
    }
}

/// One mapped, coerced row keyed by canonical field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CanonicalRecord {
    fields: BTreeMap<String, CanonicalValue>,
}

impl CanonicalRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: CanonicalValue,
    ) -> Option<CanonicalValue> {
        self.fields.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&CanonicalValue> {
        self.fields.get(key)
    }

    pub fn has_value(&self, key: &str) -> bool {
        self.fields.get(key).is_some_and(CanonicalValue::is_present)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CanonicalValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, CanonicalValue)> for CanonicalRecord {
    fn from_iter<T: IntoIterator<Item = (K, CanonicalValue)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
