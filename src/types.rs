//! Row value types and output schema descriptions.
//!
//! Rows flowing through the execution core are dynamically typed
//! `Vec<Value>` tuples. `DataType` is the parallel type tag used in
//! schema descriptions, and `ElementInfo` describes one column of a
//! plan's output schema.

use serde::{Deserialize, Serialize};

/// Data types supported by the execution core
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Boolean = 1,
    Integer = 2,
    BigInt = 3,
    Double = 4,
    Varchar = 5,
}

/// Values that can appear in result rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i32),
    BigInt(i64),
    Double(f64),
    Varchar(String),
}

impl Value {
    /// Get the data type of this value
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Integer(_) => Some(DataType::Integer),
            Value::BigInt(_) => Some(DataType::BigInt),
            Value::Double(_) => Some(DataType::Double),
            Value::Varchar(_) => Some(DataType::Varchar),
        }
    }

    /// Check if this value is compatible with the given data type
    pub fn is_compatible_with(&self, data_type: DataType) -> bool {
        match self {
            Value::Null => true, // NULL is compatible with any type
            _ => self.data_type() == Some(data_type),
        }
    }
}

/// Information about a column in a plan's output schema
#[derive(Debug, Clone, PartialEq)]
pub struct ElementInfo {
    pub name: String,
    pub data_type: DataType,
}

impl ElementInfo {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Estimate the in-memory footprint of a row, in bytes.
///
/// Uses the serialized size as a stable proxy so buffer accounting does
/// not depend on allocator details.
pub fn row_size(row: &[Value]) -> u64 {
    bincode::serialized_size(row).unwrap_or_else(|_| {
        // Serialization of plain enums cannot fail; fall back to a fixed
        // worst case if it ever does.
        (row.len() as u64) * 64
    })
}

/// Worst-case row size for a schema, used for reservation size hints.
pub fn schema_row_size(schema: &[ElementInfo]) -> u64 {
    let worst_case: Vec<Value> = schema
        .iter()
        .map(|e| match e.data_type {
            DataType::Boolean => Value::Boolean(true),
            DataType::Integer => Value::Integer(0),
            DataType::BigInt => Value::BigInt(0),
            DataType::Double => Value::Double(0.0),
            // Assume a moderately wide string column.
            DataType::Varchar => Value::Varchar(" ".repeat(64)),
        })
        .collect();
    row_size(&worst_case)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_data_types() {
        assert_eq!(Value::Null.data_type(), None);
        assert_eq!(Value::Boolean(true).data_type(), Some(DataType::Boolean));
        assert_eq!(Value::Integer(1).data_type(), Some(DataType::Integer));
        assert_eq!(Value::BigInt(1).data_type(), Some(DataType::BigInt));
        assert_eq!(Value::Double(1.5).data_type(), Some(DataType::Double));
        assert_eq!(
            Value::Varchar("x".to_string()).data_type(),
            Some(DataType::Varchar)
        );
    }

    #[test]
    fn test_value_compatibility() {
        assert!(Value::Null.is_compatible_with(DataType::Integer));
        assert!(Value::Null.is_compatible_with(DataType::Varchar));
        assert!(Value::Integer(5).is_compatible_with(DataType::Integer));
        assert!(!Value::Integer(5).is_compatible_with(DataType::BigInt));
        assert!(!Value::Varchar("a".to_string()).is_compatible_with(DataType::Boolean));
    }

    #[test]
    fn test_element_info_creation() {
        let col = ElementInfo::new("count", DataType::Integer);
        assert_eq!(col.name, "count");
        assert_eq!(col.data_type, DataType::Integer);

        let col2 = ElementInfo::new(String::from("name"), DataType::Varchar);
        assert_eq!(col2.name, "name");
    }

    #[test]
    fn test_row_size_grows_with_content() {
        let small = vec![Value::Integer(1)];
        let large = vec![Value::Integer(1), Value::Varchar("abcdefgh".to_string())];
        assert!(row_size(&large) > row_size(&small));
    }

    #[test]
    fn test_schema_row_size_positive() {
        let schema = vec![
            ElementInfo::new("id", DataType::Integer),
            ElementInfo::new("name", DataType::Varchar),
        ];
        assert!(schema_row_size(&schema) > 0);
    }
}
