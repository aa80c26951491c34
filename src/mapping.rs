use crate::error::StorageError;
use crate::model::{AttrValue, ItemKey, ValueType};
use crate::store::StorageValue;

/// Maps domain values onto raw storage primitives and back, and declares
/// which candidate values it considers assignment-compatible.
pub trait ValueMapping: Send + Sync {
    fn to_storage(&self, value: &AttrValue) -> Result<StorageValue, StorageError>;
    fn from_storage(&self, raw: StorageValue) -> Result<AttrValue, StorageError>;
    fn is_compatible(&self, value: &AttrValue) -> bool;
}

/// One-to-one mapping for a declared value type. Enumerations store their
/// literal as text and reject unknown literals before any write.
pub struct DirectMapping {
    value_type: ValueType,
}

impl DirectMapping {
    pub fn new(value_type: ValueType) -> Self {
        DirectMapping { value_type }
    }
}

impl ValueMapping for DirectMapping {
    fn to_storage(&self, value: &AttrValue) -> Result<StorageValue, StorageError> {
        match (&self.value_type, value) {
            (ValueType::Bool, AttrValue::Bool(v)) => Ok(StorageValue::Bool(*v)),
            (ValueType::Int, AttrValue::Int(v)) => Ok(StorageValue::Int(*v)),
            (ValueType::Float, AttrValue::Float(v)) => Ok(StorageValue::Float(*v)),
            (ValueType::Text, AttrValue::Text(v)) => Ok(StorageValue::Text(v.clone())),
            (ValueType::Enum { name, literals }, AttrValue::Text(v)) => {
                if literals.iter().any(|l| l == v) {
                    Ok(StorageValue::Text(v.clone()))
                } else {
                    Err(StorageError::IllegalArgument(format!(
                        "{} is no literal of enumeration {}",
                        v, name
                    )))
                }
            }
            (ValueType::Item(expected), AttrValue::Item(key)) => {
                if key.type_name == *expected {
                    Ok(StorageValue::Key(key.clone()))
                } else {
                    Err(StorageError::IllegalArgument(format!(
                        "expected an item of type {}, got {}",
                        expected, key
                    )))
                }
            }
            (expected, value) => Err(StorageError::IllegalArgument(format!(
                "value {} does not match declared type {:?}",
                value, expected
            ))),
        }
    }

    fn from_storage(&self, raw: StorageValue) -> Result<AttrValue, StorageError> {
        match (&self.value_type, raw) {
            (ValueType::Bool, StorageValue::Bool(v)) => Ok(AttrValue::Bool(v)),
            (ValueType::Int, StorageValue::Int(v)) => Ok(AttrValue::Int(v)),
            (ValueType::Float, StorageValue::Float(v)) => Ok(AttrValue::Float(v)),
            (ValueType::Text, StorageValue::Text(v)) => Ok(AttrValue::Text(v)),
            (ValueType::Enum { .. }, StorageValue::Text(v)) => Ok(AttrValue::Text(v)),
            (ValueType::Item(_), StorageValue::Key(k)) => Ok(AttrValue::Item(k)),
            (expected, raw) => Err(StorageError::Integrity(format!(
                "stored value {} does not match declared type {:?}",
                raw, expected
            ))),
        }
    }

    fn is_compatible(&self, value: &AttrValue) -> bool {
        match (&self.value_type, value) {
            (ValueType::Bool, AttrValue::Bool(_))
            | (ValueType::Int, AttrValue::Int(_))
            | (ValueType::Float, AttrValue::Float(_))
            | (ValueType::Text, AttrValue::Text(_)) => true,
            (ValueType::Enum { literals, .. }, AttrValue::Text(v)) => {
                literals.iter().any(|l| l == v)
            }
            (ValueType::Item(expected), AttrValue::Item(key)) => key.type_name == *expected,
            _ => false,
        }
    }
}

/// JSON scalar for one collection element, used by the JSON-array column
/// strategy. Item references serialize as their key object.
pub fn to_json_scalar(value: &AttrValue) -> Result<serde_json::Value, StorageError> {
    match value {
        AttrValue::Bool(v) => Ok(serde_json::Value::Bool(*v)),
        AttrValue::Int(v) => Ok(serde_json::Value::from(*v)),
        AttrValue::Float(v) => serde_json::Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .ok_or_else(|| {
                StorageError::IllegalArgument(format!("{} is not a finite number", v))
            }),
        AttrValue::Text(v) => Ok(serde_json::Value::String(v.clone())),
        AttrValue::Item(key) => Ok(serde_json::to_value(key)?),
        AttrValue::Null | AttrValue::Collection(_) => Err(StorageError::IllegalArgument(
            format!("{} is not a JSON column scalar", value),
        )),
    }
}

/// Inverse of [`to_json_scalar`], typed by the declared element type.
pub fn from_json_scalar(
    value: serde_json::Value,
    value_type: &ValueType,
) -> Result<AttrValue, StorageError> {
    match (value_type, value) {
        (ValueType::Bool, serde_json::Value::Bool(v)) => Ok(AttrValue::Bool(v)),
        (ValueType::Int, serde_json::Value::Number(n)) => n
            .as_i64()
            .map(AttrValue::Int)
            .ok_or_else(|| StorageError::Integrity(format!("{} is no integer", n))),
        (ValueType::Float, serde_json::Value::Number(n)) => n
            .as_f64()
            .map(AttrValue::Float)
            .ok_or_else(|| StorageError::Integrity(format!("{} is no float", n))),
        (ValueType::Text, serde_json::Value::String(v))
        | (ValueType::Enum { .. }, serde_json::Value::String(v)) => Ok(AttrValue::Text(v)),
        (ValueType::Item(_), value @ serde_json::Value::Object(_)) => {
            let key: ItemKey = serde_json::from_value(value)?;
            Ok(AttrValue::Item(key))
        }
        (expected, value) => Err(StorageError::Integrity(format!(
            "stored JSON value {} does not match declared type {:?}",
            value, expected
        ))),
    }
}
