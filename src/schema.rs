//! Table schema content
//!
//! A [`TableSchema`] is the structural description of a table's rows. It is an
//! immutable value: two schemas that compare equal are the same schema no
//! matter where they came from, which is what the registry deduplicates on.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::checksum::Checksum;
use crate::error::{Result, SchemaError};

/// Type of values stored in a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Int64,
    Uint64,
    Double,
    Boolean,
    String,
    Any,
    Null,
}

impl ValueType {
    /// Get the wire name for this type
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Int64 => "int64",
            ValueType::Uint64 => "uint64",
            ValueType::Double => "double",
            ValueType::Boolean => "boolean",
            ValueType::String => "string",
            ValueType::Any => "any",
            ValueType::Null => "null",
        }
    }
}

/// Sort direction of a key column
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// A single column of a table schema
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name, unique within a schema
    pub name: String,
    /// Type of the stored values
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// Sort order, present only for key columns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<SortOrder>,
    /// Whether null values are forbidden
    #[serde(default)]
    pub required: bool,
    /// Computed column expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Column group name for storage layout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl ColumnSchema {
    /// Create a new optional, unsorted column
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            sort_order: None,
            required: false,
            expression: None,
            group: None,
        }
    }

    /// Make this column a key column with the given sort order
    pub fn sorted(mut self, order: SortOrder) -> Self {
        self.sort_order = Some(order);
        self
    }

    /// Forbid nulls in this column
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Make this a computed column
    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    /// Place this column into a column group
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn is_key(&self) -> bool {
        self.sort_order.is_some()
    }
}

/// Structural description of a table's row layout
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableSchema {
    /// Columns in declaration order
    pub columns: Vec<ColumnSchema>,
    /// Whether columns outside of the schema are forbidden
    #[serde(default = "default_strict")]
    pub strict: bool,
    /// Whether key columns identify rows uniquely
    #[serde(default)]
    pub unique_keys: bool,
}

fn default_strict() -> bool {
    true
}

impl TableSchema {
    /// Create a validated schema
    ///
    /// Column names must be unique, key columns must form a prefix and
    /// `unique_keys` requires at least one key column.
    pub fn new(columns: Vec<ColumnSchema>, strict: bool, unique_keys: bool) -> Result<Self> {
        let schema = Self {
            columns,
            strict,
            unique_keys,
        };
        schema.validate()?;
        Ok(schema)
    }

    /// The empty strict schema
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            strict: true,
            unique_keys: false,
        }
    }

    /// Check structural well-formedness
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name.is_empty() {
                return Err(SchemaError::InvalidSchema("column name is empty".to_string()));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaError::InvalidSchema(format!(
                    "duplicate column {:?}",
                    column.name
                )));
            }
        }

        let key_count = self.key_columns().count();
        if self.columns[..key_count].iter().any(|c| !c.is_key()) {
            return Err(SchemaError::InvalidSchema(
                "key columns must form a prefix of the schema".to_string(),
            ));
        }
        if self.unique_keys && key_count == 0 {
            return Err(SchemaError::InvalidSchema(
                "unique_keys requires at least one key column".to_string(),
            ));
        }
        Ok(())
    }

    /// Key columns, in schema order
    pub fn key_columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns.iter().filter(|c| c.is_key())
    }

    /// Whether the table is sorted by a key
    pub fn is_sorted(&self) -> bool {
        self.columns.iter().any(ColumnSchema::is_key)
    }

    /// Find a column by name
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Structural fingerprint of this schema
    pub fn checksum(&self) -> Checksum {
        Checksum::of_serialized(self)
    }
}
