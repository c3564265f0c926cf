//! Record schema: the fixed field layout every inbound document must match.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    /// RFC 3339 timestamp, stored with UTC offset.
    Timestamp,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Timestamp => "timestamp",
        };
        f.write_str(s)
    }
}

/// One field in the record layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    /// Required fields must carry a value in every document.
    #[serde(default)]
    pub required: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Fixed schema shared by the decoder and the persistence writer.
///
/// Field order is positional: decoded records and SQL column lists both
/// follow the order of `fields`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    /// Name of the document root element.
    pub record_element: String,
    pub fields: Vec<FieldSpec>,
}

impl RecordSchema {
    /// Index of a field by element name, or `None` for unknown elements.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Reject empty or duplicate field layouts before a run starts.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.record_element.is_empty() {
            return Err("record_element must not be empty".to_string());
        }
        if self.fields.is_empty() {
            return Err("schema must declare at least one field".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err("field names must not be empty".to_string());
            }
            if !seen.insert(field.name.as_str()) {
                return Err(format!("duplicate field name: '{}'", field.name));
            }
        }
        Ok(())
    }

    /// A generated wide schema: `f0..fN` alternating over all field kinds.
    /// Used by tests and the synthetic load generator.
    pub fn synthetic(field_count: usize) -> Self {
        let kinds = [
            FieldKind::Text,
            FieldKind::Integer,
            FieldKind::Float,
            FieldKind::Timestamp,
        ];
        let fields = (0..field_count)
            .map(|i| FieldSpec::new(format!("f{i}"), kinds[i % kinds.len()]))
            .collect();
        Self {
            record_element: "record".to_string(),
            fields,
        }
    }
}
