use crate::error::{StorageError, Violation};
use crate::model::{AttrValue, AttributeDescriptor, ItemKey};
use crate::store::{ItemStore, PreloadContribution, StorageValue};
use crate::strategy::{expect_ref, not_a_collection, StorageStrategy};

/// To-one reference with inverted placement: the foreign-key column lives on
/// the target item and points back at the owner. Used for compositions where
/// the child carries the link to its single parent. A target claimed by a
/// different owner is never silently stolen.
pub struct ReverseForeignKeyStorage {
    attr: AttributeDescriptor,
    column: String,
}

impl ReverseForeignKeyStorage {
    pub fn new(attr: AttributeDescriptor, column: &str) -> Self {
        ReverseForeignKeyStorage { attr, column: column.to_string() }
    }

    /// Current owner written into `target`'s back-reference column.
    fn owner_of(
        &self,
        store: &dyn ItemStore,
        target: &ItemKey,
    ) -> Result<Option<ItemKey>, StorageError> {
        match store.column(target, &self.column)? {
            None => Ok(None),
            Some(StorageValue::Key(owner)) => Ok(Some(owner)),
            Some(other) => Err(StorageError::Integrity(format!(
                "back-reference column {} of {} holds non-key value {}",
                self.column, target, other
            ))),
        }
    }

    /// The item currently claimed by `owner`, expecting at most one hit.
    fn current_target(
        &self,
        store: &dyn ItemStore,
        owner: &ItemKey,
    ) -> Result<Option<ItemKey>, StorageError> {
        let mut hits = store.referrers_by_column(
            &self.column,
            &StorageValue::Key(owner.clone()),
            None,
            None,
        )?;
        if hits.len() > 1 {
            crate::error!(
                "attribute {}: {} items carry a back-reference to {}",
                self.attr.name,
                hits.len(),
                owner
            );
            return Err(StorageError::Integrity(format!(
                "more than one back-reference to {} for exclusive attribute {}",
                owner, self.attr.name
            )));
        }
        Ok(hits.pop())
    }
}

impl StorageStrategy for ReverseForeignKeyStorage {
    fn descriptor(&self) -> &AttributeDescriptor {
        &self.attr
    }

    fn read(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<AttrValue, StorageError> {
        Ok(self.current_target(store, item)?.map(AttrValue::Item).unwrap_or(AttrValue::Null))
    }

    fn validate(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
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
            value => {
                let target = expect_ref(&self.attr, value)?;
                match self.owner_of(store, target)? {
                    Some(owner) if owner != *item => Err(Violation::OwnershipConflict {
                        attr: self.attr.name.clone(),
                        target: target.to_string(),
                        current_owner: owner.to_string(),
                    }
                    .into()),
                    _ => Ok(()),
                }
            }
        }
    }

    fn write(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: AttrValue,
    ) -> Result<(), StorageError> {
        self.validate(store, item, &value)?;
        let old_target = self.current_target(store, item)?;
        let new_target = match &value {
            AttrValue::Null => None,
            value => Some(expect_ref(&self.attr, value)?.clone()),
        };
        if old_target == new_target {
            return Ok(());
        }
        if let Some(target) = &new_target {
            store.set_column(target, &self.column, Some(StorageValue::Key(item.clone())))?;
        }
        if let Some(old) = &old_target {
            if let Err(err) = store.set_column(old, &self.column, None) {
                // Best-effort compensation: release the just-claimed target
                // before re-raising.
                if let Some(target) = &new_target {
                    if store.set_column(target, &self.column, None).is_err() {
                        crate::warn!(
                            "attribute {}: could not release {} after failed write",
                            self.attr.name,
                            target
                        );
                    }
                }
                return Err(err.into());
            }
        }
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

    /// Reverse navigation is a plain column read on the target side.
    fn referrers(
        &self,
        store: &dyn ItemStore,
        target: &ItemKey,
    ) -> Result<Vec<ItemKey>, StorageError> {
        Ok(self.owner_of(store, target)?.into_iter().collect())
    }

    fn preload_contribution(&self) -> Option<PreloadContribution> {
        Some(PreloadContribution::Columns { column: self.column.clone() })
    }

    fn reverse_preload_contribution(&self) -> Option<PreloadContribution> {
        Some(PreloadContribution::Columns { column: self.column.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Multiplicity, ValueType};
    use crate::store::mem::MemStore;

    fn attr() -> AttributeDescriptor {
        AttributeDescriptor {
            id: "Folder#content".to_string(),
            name: "content".to_string(),
            owner_type: "Folder".to_string(),
            multiplicity: Multiplicity::Single,
            ordered: false,
            bag: false,
            mandatory: false,
            composite: true,
            value_type: ValueType::Item("Document".to_string()),
        }
    }

    #[test]
    fn claim_reassign_and_clear() {
        let store = MemStore::new();
        let strategy = ReverseForeignKeyStorage::new(attr(), "parent");
        let folder = ItemKey::new("Folder", 1);
        let doc_a = ItemKey::new("Document", 1);
        let doc_b = ItemKey::new("Document", 2);

        strategy.write(&store, &folder, AttrValue::Item(doc_a.clone())).unwrap();
        assert_eq!(strategy.read(&store, &folder).unwrap(), AttrValue::Item(doc_a.clone()));
        assert_eq!(strategy.referrers(&store, &doc_a).unwrap(), vec![folder.clone()]);

        // Pointing somewhere else releases the old target.
        strategy.write(&store, &folder, AttrValue::Item(doc_b.clone())).unwrap();
        assert_eq!(store.column(&doc_a, "parent").unwrap(), None);
        assert_eq!(strategy.read(&store, &folder).unwrap(), AttrValue::Item(doc_b.clone()));

        strategy.write(&store, &folder, AttrValue::Null).unwrap();
        assert_eq!(store.column(&doc_b, "parent").unwrap(), None);
        assert_eq!(strategy.read(&store, &folder).unwrap(), AttrValue::Null);
    }

    #[test]
    fn conflicting_owner_is_named_and_nothing_is_stolen() {
        let store = MemStore::new();
        let strategy = ReverseForeignKeyStorage::new(attr(), "parent");
        let folder_a = ItemKey::new("Folder", 1);
        let folder_b = ItemKey::new("Folder", 2);
        let doc = ItemKey::new("Document", 1);

        strategy.write(&store, &folder_a, AttrValue::Item(doc.clone())).unwrap();
        let err = strategy.write(&store, &folder_b, AttrValue::Item(doc.clone())).unwrap_err();
        match err.violation() {
            Some(Violation::OwnershipConflict { current_owner, .. }) => {
                assert_eq!(current_owner, "Folder#1");
            }
            other => panic!("expected ownership conflict, got {:?}", other),
        }
        // Still owned by the first folder.
        assert_eq!(strategy.read(&store, &folder_a).unwrap(), AttrValue::Item(doc));
        assert_eq!(strategy.read(&store, &folder_b).unwrap(), AttrValue::Null);
    }

    #[test]
    fn rewrite_to_same_target_is_a_noop() {
        let store = MemStore::new();
        let strategy = ReverseForeignKeyStorage::new(attr(), "parent");
        let folder = ItemKey::new("Folder", 1);
        let doc = ItemKey::new("Document", 1);
        strategy.write(&store, &folder, AttrValue::Item(doc.clone())).unwrap();
        strategy.write(&store, &folder, AttrValue::Item(doc.clone())).unwrap();
        assert_eq!(strategy.read(&store, &folder).unwrap(), AttrValue::Item(doc));
    }

    #[test]
    fn two_back_references_are_an_integrity_failure() {
        let store = MemStore::new();
        let strategy = ReverseForeignKeyStorage::new(attr(), "parent");
        let folder = ItemKey::new("Folder", 1);
        // Corrupt state written behind the strategy's back.
        store
            .set_column(&ItemKey::new("Document", 1), "parent", Some(StorageValue::Key(folder.clone())))
            .unwrap();
        store
            .set_column(&ItemKey::new("Document", 2), "parent", Some(StorageValue::Key(folder.clone())))
            .unwrap();
        let err = strategy.read(&store, &folder).unwrap_err();
        assert!(matches!(err, StorageError::Integrity(_)));
    }
}
