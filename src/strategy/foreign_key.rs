use crate::error::{StorageError, Violation};
use crate::model::{AttrValue, AttributeDescriptor, ItemKey};
use crate::store::{ItemStore, PreloadContribution, StorageValue};
use crate::strategy::{expect_ref, not_a_collection, StorageStrategy};

/// To-one reference stored as a foreign-key column on the owning item's row.
/// Placement on the owner means no ownership-exclusivity check is needed.
pub struct ForeignKeyStorage {
    attr: AttributeDescriptor,
    column: String,
}

impl ForeignKeyStorage {
    pub fn new(attr: AttributeDescriptor, column: &str) -> Self {
        ForeignKeyStorage { attr, column: column.to_string() }
    }
}

impl StorageStrategy for ForeignKeyStorage {
    fn descriptor(&self) -> &AttributeDescriptor {
        &self.attr
    }

    fn read(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<AttrValue, StorageError> {
        match store.column(item, &self.column)? {
            None => Ok(AttrValue::Null),
            Some(StorageValue::Key(target)) => Ok(AttrValue::Item(target)),
            Some(other) => Err(StorageError::Integrity(format!(
                "reference column {} of {} holds non-key value {}",
                self.column, self.attr.name, other
            ))),
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
            value => expect_ref(&self.attr, value).map(|_| ()),
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
            value => Some(StorageValue::Key(expect_ref(&self.attr, value)?.clone())),
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

    /// Who points at `target`: index query over the foreign-key column,
    /// restricted to this attribute's owner type when the table is shared.
    fn referrers(
        &self,
        store: &dyn ItemStore,
        target: &ItemKey,
    ) -> Result<Vec<ItemKey>, StorageError> {
        let hits = store.referrers_by_column(
            &self.column,
            &StorageValue::Key(target.clone()),
            None,
            None,
        )?;
        Ok(hits.into_iter().filter(|item| item.type_name == self.attr.owner_type).collect())
    }

    fn preload_contribution(&self) -> Option<PreloadContribution> {
        Some(PreloadContribution::Columns { column: self.column.clone() })
    }

    fn reverse_preload_contribution(&self) -> Option<PreloadContribution> {
        Some(PreloadContribution::Columns { column: self.column.clone() })
    }
}
