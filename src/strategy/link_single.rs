use crate::error::{StorageError, Violation};
use crate::model::{AttrValue, AttributeDescriptor, ItemKey};
use crate::store::{ItemStore, LinkRecord, LinkSpec, PreloadContribution};
use crate::strategy::{expect_ref, not_a_collection, StorageStrategy};

/// To-one reference persisted with link-table mechanics instead of a
/// foreign-key column. Chosen when the reference must live in a shared link
/// table, e.g. for historized link tables or wide polymorphic target types.
pub struct LinkSingleStorage {
    attr: AttributeDescriptor,
    spec: LinkSpec,
    definition: Option<String>,
}

impl LinkSingleStorage {
    pub fn new(attr: AttributeDescriptor, spec: LinkSpec) -> Self {
        let definition = if spec.monomorphic { None } else { Some(attr.id.clone()) };
        LinkSingleStorage { attr, spec, definition }
    }

    fn definition(&self) -> Option<&str> {
        self.definition.as_deref()
    }

    fn current(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<Option<LinkRecord>, StorageError> {
        let mut links = store.links_from(&self.spec, item, self.definition())?;
        if links.len() > 1 {
            crate::error!(
                "attribute {}: {} links found for single-valued reference of {}",
                self.attr.name,
                links.len(),
                item
            );
            return Err(StorageError::Integrity(format!(
                "more than one link for single-valued attribute {} of {}",
                self.attr.name, item
            )));
        }
        Ok(links.pop())
    }
}

impl StorageStrategy for LinkSingleStorage {
    fn descriptor(&self) -> &AttributeDescriptor {
        &self.attr
    }

    fn read(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<AttrValue, StorageError> {
        Ok(self.current(store, item)?.map(|l| AttrValue::Item(l.target)).unwrap_or(AttrValue::Null))
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
        let old = self.current(store, item)?;
        let new_target = match &value {
            AttrValue::Null => None,
            value => Some(expect_ref(&self.attr, value)?.clone()),
        };
        if old.as_ref().map(|l| &l.target) == new_target.as_ref() {
            return Ok(());
        }
        if let Some(old) = &old {
            store.delete_link(&self.spec, old)?;
        }
        if let Some(target) = new_target {
            let link = LinkRecord::new(item.clone(), target)
                .with_definition(self.definition.clone());
            store.create_link(&self.spec, link)?;
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

    fn link_spec(&self) -> Option<&LinkSpec> {
        Some(&self.spec)
    }

    fn referrers(
        &self,
        store: &dyn ItemStore,
        target: &ItemKey,
    ) -> Result<Vec<ItemKey>, StorageError> {
        let links = store.links_to(&self.spec, target, self.definition())?;
        let mut sources: Vec<ItemKey> = links.into_iter().map(|l| l.source).collect();
        sources.sort();
        sources.dedup();
        Ok(sources)
    }

    fn preload_contribution(&self) -> Option<PreloadContribution> {
        Some(PreloadContribution::Links {
            spec: self.spec.clone(),
            definition: self.definition.clone(),
            reverse: false,
        })
    }

    fn reverse_preload_contribution(&self) -> Option<PreloadContribution> {
        Some(PreloadContribution::Links {
            spec: self.spec.clone(),
            definition: self.definition.clone(),
            reverse: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Multiplicity, ValueType};
    use crate::store::mem::MemStore;

    fn attr() -> AttributeDescriptor {
        AttributeDescriptor {
            id: "Ticket#milestone".to_string(),
            name: "milestone".to_string(),
            owner_type: "Ticket".to_string(),
            multiplicity: Multiplicity::Single,
            ordered: false,
            bag: false,
            mandatory: false,
            composite: false,
            value_type: ValueType::Item("Milestone".to_string()),
        }
    }

    #[test]
    fn replace_deletes_the_old_link_first() {
        let store = MemStore::new();
        let strategy = LinkSingleStorage::new(attr(), LinkSpec::polymorphic("hasValue"));
        let ticket = ItemKey::new("Ticket", 1);
        let m1 = ItemKey::new("Milestone", 1);
        let m2 = ItemKey::new("Milestone", 2);

        strategy.write(&store, &ticket, AttrValue::Item(m1.clone())).unwrap();
        strategy.write(&store, &ticket, AttrValue::Item(m2.clone())).unwrap();
        assert_eq!(strategy.read(&store, &ticket).unwrap(), AttrValue::Item(m2.clone()));
        assert!(strategy.referrers(&store, &m1).unwrap().is_empty());
        assert_eq!(strategy.referrers(&store, &m2).unwrap(), vec![ticket.clone()]);

        strategy.write(&store, &ticket, AttrValue::Null).unwrap();
        assert_eq!(strategy.read(&store, &ticket).unwrap(), AttrValue::Null);
    }

    #[test]
    fn add_and_remove_are_rejected() {
        let store = MemStore::new();
        let strategy = LinkSingleStorage::new(attr(), LinkSpec::polymorphic("hasValue"));
        let ticket = ItemKey::new("Ticket", 1);
        let value = AttrValue::Item(ItemKey::new("Milestone", 1));
        assert!(matches!(
            strategy.add(&store, &ticket, value.clone()).unwrap_err(),
            StorageError::IllegalArgument(_)
        ));
        assert!(matches!(
            strategy.remove(&store, &ticket, &value).unwrap_err(),
            StorageError::IllegalArgument(_)
        ));
    }

    #[test]
    fn two_links_are_an_integrity_failure() {
        let store = MemStore::new();
        let spec = LinkSpec::polymorphic("hasValue");
        let strategy = LinkSingleStorage::new(attr(), spec.clone());
        let ticket = ItemKey::new("Ticket", 1);
        // Corrupt state written behind the strategy's back.
        for id in [1, 2] {
            store
                .create_link(
                    &spec,
                    LinkRecord::new(ticket.clone(), ItemKey::new("Milestone", id))
                        .with_definition(Some("Ticket#milestone".to_string())),
                )
                .unwrap();
        }
        let err = strategy.read(&store, &ticket).unwrap_err();
        assert!(matches!(err, StorageError::Integrity(_)));
    }
}
