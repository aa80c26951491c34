use crate::error::{StorageError, Violation};
use crate::mapping::{from_json_scalar, to_json_scalar, DirectMapping, ValueMapping};
use crate::model::{AttrValue, AttributeDescriptor, ItemKey};
use crate::store::{ItemStore, PreloadContribution, StorageValue};
use crate::strategy::{
    check_mandatory_floor, check_set_uniqueness, expect_collection, not_a_collection,
    StorageStrategy,
};

/// Single primitive value in one physical column, through a value mapping.
pub struct ColumnStorage {
    attr: AttributeDescriptor,
    column: String,
    mapping: DirectMapping,
}

impl ColumnStorage {
    pub fn new(attr: AttributeDescriptor, column: &str) -> Self {
        let mapping = DirectMapping::new(attr.value_type.clone());
        ColumnStorage { attr, column: column.to_string(), mapping }
    }
}

impl StorageStrategy for ColumnStorage {
    fn descriptor(&self) -> &AttributeDescriptor {
        &self.attr
    }

    fn read(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<AttrValue, StorageError> {
        match store.column(item, &self.column)? {
            Some(raw) => self.mapping.from_storage(raw),
            None => Ok(AttrValue::Null),
        }
    }

    fn validate(
        &self,
        _store: &dyn ItemStore,
        _item: &ItemKey,
        candidate: &AttrValue,
    ) -> Result<(), StorageError> {
        match candidate {
            AttrValue::Null => {
                if self.attr.mandatory {
                    Err(Violation::MandatoryEmpty { attr: self.attr.name.clone() }.into())
                } else {
                    Ok(())
                }
            }
            AttrValue::Collection(_) => Err(StorageError::IllegalArgument(format!(
                "attribute {} is single-valued",
                self.attr.name
            ))),
            value => self.mapping.to_storage(value).map(|_| ()),
        }
    }

    fn write(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: AttrValue,
    ) -> Result<(), StorageError> {
        self.validate(store, item, &value)?;
        let raw = match &value {
            AttrValue::Null => None,
            value => Some(self.mapping.to_storage(value)?),
        };
        store.set_column(item, &self.column, raw)?;
        Ok(())
    }

    fn add(
        &self,
        _store: &dyn ItemStore,
        _item: &ItemKey,
        _value: AttrValue,
    ) -> Result<(), StorageError> {
        Err(not_a_collection(&self.attr))
    }

    fn remove(
        &self,
        _store: &dyn ItemStore,
        _item: &ItemKey,
        _value: &AttrValue,
    ) -> Result<(), StorageError> {
        Err(not_a_collection(&self.attr))
    }

    fn preload_contribution(&self) -> Option<PreloadContribution> {
        Some(PreloadContribution::Columns { column: self.column.clone() })
    }
}

/// Collection of scalars serialized as a JSON array into one column. Add and
/// remove materialize the current collection, apply the delta and rewrite the
/// whole column, so there is no live view.
pub struct JsonColumnStorage {
    attr: AttributeDescriptor,
    column: String,
    mapping: DirectMapping,
}

impl JsonColumnStorage {
    pub fn new(attr: AttributeDescriptor, column: &str) -> Self {
        let mapping = DirectMapping::new(attr.value_type.clone());
        JsonColumnStorage { attr, column: column.to_string(), mapping }
    }

    fn current(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<Vec<AttrValue>, StorageError> {
        match store.column(item, &self.column)? {
            None => Ok(Vec::new()),
            Some(StorageValue::Text(json)) if json.is_empty() => Ok(Vec::new()),
            Some(StorageValue::Text(json)) => {
                let parsed: Vec<serde_json::Value> = serde_json::from_str(&json)?;
                parsed
                    .into_iter()
                    .map(|v| from_json_scalar(v, &self.attr.value_type))
                    .collect()
            }
            Some(other) => Err(StorageError::Integrity(format!(
                "column {} of {} holds {} instead of a JSON array",
                self.column, self.attr.name, other
            ))),
        }
    }

    fn rewrite(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        values: &[AttrValue],
    ) -> Result<(), StorageError> {
        if values.is_empty() {
            store.set_column(item, &self.column, None)?;
            return Ok(());
        }
        let scalars: Vec<serde_json::Value> =
            values.iter().map(to_json_scalar).collect::<Result<_, _>>()?;
        let json = serde_json::to_string(&scalars)?;
        store.set_column(item, &self.column, Some(StorageValue::Text(json)))?;
        Ok(())
    }

    fn check_element(&self, value: &AttrValue) -> Result<(), StorageError> {
        if self.mapping.is_compatible(value) {
            Ok(())
        } else {
            Err(StorageError::IllegalArgument(format!(
                "value {} does not match element type of attribute {}",
                value, self.attr.name
            )))
        }
    }
}

impl StorageStrategy for JsonColumnStorage {
    fn descriptor(&self) -> &AttributeDescriptor {
        &self.attr
    }

    fn read(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<AttrValue, StorageError> {
        Ok(AttrValue::Collection(self.current(store, item)?))
    }

    fn validate(
        &self,
        _store: &dyn ItemStore,
        _item: &ItemKey,
        candidate: &AttrValue,
    ) -> Result<(), StorageError> {
        let elements = expect_collection(&self.attr, candidate)?;
        for value in elements {
            self.check_element(value)?;
        }
        check_set_uniqueness(&self.attr, elements)
    }

    fn write(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: AttrValue,
    ) -> Result<(), StorageError> {
        self.validate(store, item, &value)?;
        let elements = expect_collection(&self.attr, &value)?;
        self.rewrite(store, item, elements)
    }

    fn add(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: AttrValue,
    ) -> Result<(), StorageError> {
        self.check_element(&value)?;
        let mut current = self.current(store, item)?;
        if !self.attr.bag && current.contains(&value) {
            return Err(Violation::Duplicate {
                attr: self.attr.name.clone(),
                value: value.to_string(),
            }
            .into());
        }
        current.push(value);
        self.rewrite(store, item, &current)
    }

    fn remove(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: &AttrValue,
    ) -> Result<(), StorageError> {
        let mut current = self.current(store, item)?;
        let Some(pos) = current.iter().position(|v| v == value) else {
            return Err(Violation::NotAMember {
                attr: self.attr.name.clone(),
                value: value.to_string(),
            }
            .into());
        };
        check_mandatory_floor(&self.attr, current.len())?;
        current.remove(pos);
        self.rewrite(store, item, &current)
    }

    fn preload_contribution(&self) -> Option<PreloadContribution> {
        Some(PreloadContribution::Columns { column: self.column.clone() })
    }
}

/// Legacy variant: a string collection joined into one plain column with a
/// single separator character.
pub struct SeparatedColumnStorage {
    attr: AttributeDescriptor,
    column: String,
    separator: char,
}

impl SeparatedColumnStorage {
    pub fn new(attr: AttributeDescriptor, column: &str, separator: char) -> Self {
        SeparatedColumnStorage { attr, column: column.to_string(), separator }
    }

    fn current(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<Vec<AttrValue>, StorageError> {
        match store.column(item, &self.column)? {
            None => Ok(Vec::new()),
            Some(StorageValue::Text(joined)) if joined.is_empty() => Ok(Vec::new()),
            Some(StorageValue::Text(joined)) => Ok(joined
                .split(self.separator)
                .map(|part| AttrValue::Text(part.to_string()))
                .collect()),
            Some(other) => Err(StorageError::Integrity(format!(
                "column {} of {} holds {} instead of text",
                self.column, self.attr.name, other
            ))),
        }
    }

    fn rewrite(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        values: &[AttrValue],
    ) -> Result<(), StorageError> {
        if values.is_empty() {
            store.set_column(item, &self.column, None)?;
            return Ok(());
        }
        let mut parts = Vec::with_capacity(values.len());
        for value in values {
            parts.push(self.check_element(value)?);
        }
        let joined = parts.join(&self.separator.to_string());
        store.set_column(item, &self.column, Some(StorageValue::Text(joined)))?;
        Ok(())
    }

    fn check_element<'v>(&self, value: &'v AttrValue) -> Result<&'v str, StorageError> {
        match value {
            AttrValue::Text(text) if text.is_empty() => Err(StorageError::IllegalArgument(
                format!("attribute {} rejects empty strings", self.attr.name),
            )),
            AttrValue::Text(text) if text.contains(self.separator) => {
                Err(StorageError::IllegalArgument(format!(
                    "value {} contains the separator {:?} of attribute {}",
                    text, self.separator, self.attr.name
                )))
            }
            AttrValue::Text(text) => Ok(text),
            other => Err(StorageError::IllegalArgument(format!(
                "attribute {} stores strings, got {}",
                self.attr.name, other
            ))),
        }
    }
}

impl StorageStrategy for SeparatedColumnStorage {
    fn descriptor(&self) -> &AttributeDescriptor {
        &self.attr
    }

    fn read(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<AttrValue, StorageError> {
        Ok(AttrValue::Collection(self.current(store, item)?))
    }

    fn validate(
        &self,
        _store: &dyn ItemStore,
        _item: &ItemKey,
        candidate: &AttrValue,
    ) -> Result<(), StorageError> {
        let elements = expect_collection(&self.attr, candidate)?;
        for value in elements {
            self.check_element(value)?;
        }
        check_set_uniqueness(&self.attr, elements)
    }

    fn write(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: AttrValue,
    ) -> Result<(), StorageError> {
        self.validate(store, item, &value)?;
        let elements = expect_collection(&self.attr, &value)?;
        self.rewrite(store, item, elements)
    }

    fn add(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: AttrValue,
    ) -> Result<(), StorageError> {
        self.check_element(&value)?;
        let mut current = self.current(store, item)?;
        if !self.attr.bag && current.contains(&value) {
            return Err(Violation::Duplicate {
                attr: self.attr.name.clone(),
                value: value.to_string(),
            }
            .into());
        }
        current.push(value);
        self.rewrite(store, item, &current)
    }

    fn remove(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: &AttrValue,
    ) -> Result<(), StorageError> {
        let mut current = self.current(store, item)?;
        let Some(pos) = current.iter().position(|v| v == value) else {
            return Err(Violation::NotAMember {
                attr: self.attr.name.clone(),
                value: value.to_string(),
            }
            .into());
        };
        check_mandatory_floor(&self.attr, current.len())?;
        current.remove(pos);
        self.rewrite(store, item, &current)
    }

    fn preload_contribution(&self) -> Option<PreloadContribution> {
        Some(PreloadContribution::Columns { column: self.column.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Multiplicity, ValueType};
    use crate::store::mem::MemStore;

    fn scalar_attr(mandatory: bool) -> AttributeDescriptor {
        AttributeDescriptor {
            id: "Person#name".to_string(),
            name: "name".to_string(),
            owner_type: "Person".to_string(),
            multiplicity: Multiplicity::Single,
            ordered: false,
            bag: false,
            mandatory,
            composite: false,
            value_type: ValueType::Text,
        }
    }

    fn list_attr(bag: bool, mandatory: bool) -> AttributeDescriptor {
        AttributeDescriptor {
            id: "Person#tags".to_string(),
            name: "tags".to_string(),
            owner_type: "Person".to_string(),
            multiplicity: Multiplicity::Multiple,
            ordered: true,
            bag,
            mandatory,
            composite: false,
            value_type: ValueType::Text,
        }
    }

    fn texts(values: &[&str]) -> AttrValue {
        AttrValue::Collection(values.iter().map(|v| AttrValue::Text((*v).to_string())).collect())
    }

    #[test]
    fn scalar_roundtrip_and_clear() {
        let store = MemStore::new();
        let strategy = ColumnStorage::new(scalar_attr(false), "name");
        let item = ItemKey::new("Person", 1);
        strategy.write(&store, &item, AttrValue::Text("Ada".into())).unwrap();
        assert_eq!(strategy.read(&store, &item).unwrap(), AttrValue::Text("Ada".into()));
        strategy.write(&store, &item, AttrValue::Null).unwrap();
        assert_eq!(strategy.read(&store, &item).unwrap(), AttrValue::Null);
    }

    #[test]
    fn scalar_mandatory_rejects_null() {
        let store = MemStore::new();
        let strategy = ColumnStorage::new(scalar_attr(true), "name");
        let item = ItemKey::new("Person", 1);
        let err = strategy.write(&store, &item, AttrValue::Null).unwrap_err();
        assert!(matches!(
            err.violation(),
            Some(Violation::MandatoryEmpty { .. })
        ));
    }

    #[test]
    fn scalar_rejects_wrong_type_before_write() {
        let store = MemStore::new();
        let strategy = ColumnStorage::new(scalar_attr(false), "name");
        let item = ItemKey::new("Person", 1);
        let err = strategy.write(&store, &item, AttrValue::Int(5)).unwrap_err();
        assert!(matches!(err, StorageError::IllegalArgument(_)));
        assert_eq!(store.column(&item, "name").unwrap(), None);
    }

    #[test]
    fn json_column_preserves_order() {
        let store = MemStore::new();
        let strategy = JsonColumnStorage::new(list_attr(false, false), "tags");
        let item = ItemKey::new("Person", 1);
        strategy.write(&store, &item, texts(&["a", "b", "c"])).unwrap();
        assert_eq!(strategy.read(&store, &item).unwrap(), texts(&["a", "b", "c"]));
        strategy.write(&store, &item, texts(&["b", "a", "c"])).unwrap();
        assert_eq!(strategy.read(&store, &item).unwrap(), texts(&["b", "a", "c"]));
    }

    #[test]
    fn json_column_absent_reads_empty() {
        let store = MemStore::new();
        let strategy = JsonColumnStorage::new(list_attr(false, false), "tags");
        let item = ItemKey::new("Person", 1);
        assert_eq!(strategy.read(&store, &item).unwrap(), AttrValue::Collection(vec![]));
    }

    #[test]
    fn json_column_add_twice_raises_duplicate() {
        let store = MemStore::new();
        let strategy = JsonColumnStorage::new(list_attr(false, false), "tags");
        let item = ItemKey::new("Person", 1);
        strategy.add(&store, &item, AttrValue::Text("a".into())).unwrap();
        let err = strategy.add(&store, &item, AttrValue::Text("a".into())).unwrap_err();
        assert!(matches!(err.violation(), Some(Violation::Duplicate { .. })));
        assert_eq!(strategy.read(&store, &item).unwrap(), texts(&["a"]));
    }

    #[test]
    fn json_column_bag_allows_duplicates() {
        let store = MemStore::new();
        let strategy = JsonColumnStorage::new(list_attr(true, false), "tags");
        let item = ItemKey::new("Person", 1);
        strategy.add(&store, &item, AttrValue::Text("a".into())).unwrap();
        strategy.add(&store, &item, AttrValue::Text("a".into())).unwrap();
        assert_eq!(strategy.read(&store, &item).unwrap(), texts(&["a", "a"]));
    }

    #[test]
    fn json_column_mandatory_floor() {
        let store = MemStore::new();
        let strategy = JsonColumnStorage::new(list_attr(false, true), "tags");
        let item = ItemKey::new("Person", 1);
        strategy.add(&store, &item, AttrValue::Text("a".into())).unwrap();
        let err = strategy.remove(&store, &item, &AttrValue::Text("a".into())).unwrap_err();
        assert!(matches!(err.violation(), Some(Violation::MandatoryEmpty { .. })));
        assert_eq!(strategy.read(&store, &item).unwrap(), texts(&["a"]));
    }

    #[test]
    fn separated_column_roundtrip() {
        let store = MemStore::new();
        let strategy = SeparatedColumnStorage::new(list_attr(false, false), "tags", ',');
        let item = ItemKey::new("Person", 1);
        strategy.write(&store, &item, texts(&["a", "b"])).unwrap();
        assert_eq!(
            store.column(&item, "tags").unwrap(),
            Some(StorageValue::Text("a,b".into()))
        );
        assert_eq!(strategy.read(&store, &item).unwrap(), texts(&["a", "b"]));
        strategy.remove(&store, &item, &AttrValue::Text("a".into())).unwrap();
        assert_eq!(strategy.read(&store, &item).unwrap(), texts(&["b"]));
    }

    #[test]
    fn separated_column_rejects_separator_in_value() {
        let store = MemStore::new();
        let strategy = SeparatedColumnStorage::new(list_attr(false, false), "tags", ',');
        let item = ItemKey::new("Person", 1);
        let err = strategy.add(&store, &item, AttrValue::Text("a,b".into())).unwrap_err();
        assert!(matches!(err, StorageError::IllegalArgument(_)));
        assert_eq!(store.column(&item, "tags").unwrap(), None);
    }
}
