use crate::error::{StorageError, Violation};
use crate::model::{AttrValue, AttributeDescriptor, ItemKey};
use crate::store::{ItemStore, LinkSpec, PreloadContribution};
use crate::strategy::StorageStrategy;
use std::sync::Arc;

/// Read-only inverse of another attribute's link direction. Owns no state of
/// its own: reading walks the opposite attribute's link table from the target
/// side. Bound in the second binder pass, after the opposite attribute.
pub struct ReverseNavigationStorage {
    attr: AttributeDescriptor,
    spec: Option<LinkSpec>,
    definition: Option<String>,
}

impl ReverseNavigationStorage {
    pub fn new(attr: AttributeDescriptor, opposite: &Arc<dyn StorageStrategy>) -> Self {
        let spec = opposite.link_spec().cloned();
        let definition = match &spec {
            Some(spec) if !spec.monomorphic => Some(opposite.descriptor().id.clone()),
            _ => None,
        };
        ReverseNavigationStorage { attr, spec, definition }
    }

    fn read_only(&self) -> StorageError {
        Violation::ReadOnly { attr: self.attr.name.clone() }.into()
    }

    fn sources(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<Vec<ItemKey>, StorageError> {
        // An opposite without a link table has no navigable inverse here.
        let Some(spec) = &self.spec else {
            return Ok(Vec::new());
        };
        let links = store.links_to(spec, item, self.definition.as_deref())?;
        let mut sources: Vec<ItemKey> = links.into_iter().map(|l| l.source).collect();
        sources.sort();
        sources.dedup();
        Ok(sources)
    }
}

impl StorageStrategy for ReverseNavigationStorage {
    fn descriptor(&self) -> &AttributeDescriptor {
        &self.attr
    }

    fn read(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<AttrValue, StorageError> {
        let mut sources = self.sources(store, item)?;
        if self.attr.is_collection() {
            return Ok(AttrValue::Collection(sources.into_iter().map(AttrValue::Item).collect()));
        }
        if sources.len() > 1 {
            return Err(StorageError::Integrity(format!(
                "{} items link to {} through single-valued inverse attribute {}",
                sources.len(),
                item,
                self.attr.name
            )));
        }
        Ok(sources.pop().map(AttrValue::Item).unwrap_or(AttrValue::Null))
    }

    fn validate(
        &self,
        _store: &dyn ItemStore,
        _item: &ItemKey,
        _candidate: &AttrValue,
    ) -> Result<(), StorageError> {
        Err(self.read_only())
    }

    fn write(
        &self,
        _store: &dyn ItemStore,
        _item: &ItemKey,
        _value: AttrValue,
    ) -> Result<(), StorageError> {
        Err(self.read_only())
    }

    fn add(
        &self,
        _store: &dyn ItemStore,
        _item: &ItemKey,
        _value: AttrValue,
    ) -> Result<(), StorageError> {
        Err(self.read_only())
    }

    fn remove(
        &self,
        _store: &dyn ItemStore,
        _item: &ItemKey,
        _value: &AttrValue,
    ) -> Result<(), StorageError> {
        Err(self.read_only())
    }

    fn is_derived(&self) -> bool {
        true
    }

    /// Referrers of the inverse are the forward direction: everything `target`
    /// links to through the opposite attribute.
    fn referrers(
        &self,
        store: &dyn ItemStore,
        target: &ItemKey,
    ) -> Result<Vec<ItemKey>, StorageError> {
        let Some(spec) = &self.spec else {
            return Ok(Vec::new());
        };
        let links = store.links_from(spec, target, self.definition.as_deref())?;
        let mut targets: Vec<ItemKey> = links.into_iter().map(|l| l.target).collect();
        targets.sort();
        targets.dedup();
        Ok(targets)
    }

    fn preload_contribution(&self) -> Option<PreloadContribution> {
        self.spec.as_ref().map(|spec| PreloadContribution::Links {
            spec: spec.clone(),
            definition: self.definition.clone(),
            reverse: true,
        })
    }

    fn reverse_preload_contribution(&self) -> Option<PreloadContribution> {
        self.spec.as_ref().map(|spec| PreloadContribution::Links {
            spec: spec.clone(),
            definition: self.definition.clone(),
            reverse: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Multiplicity, ValueType};
    use crate::store::mem::MemStore;
    use crate::strategy::link_set::LinkSetStorage;

    fn forward_attr() -> AttributeDescriptor {
        AttributeDescriptor {
            id: "Project#members".to_string(),
            name: "members".to_string(),
            owner_type: "Project".to_string(),
            multiplicity: Multiplicity::Multiple,
            ordered: false,
            bag: false,
            mandatory: false,
            composite: false,
            value_type: ValueType::Item("Person".to_string()),
        }
    }

    fn inverse_attr() -> AttributeDescriptor {
        AttributeDescriptor {
            id: "Person#projects".to_string(),
            name: "projects".to_string(),
            owner_type: "Person".to_string(),
            multiplicity: Multiplicity::Multiple,
            ordered: false,
            bag: false,
            mandatory: false,
            composite: false,
            value_type: ValueType::Item("Project".to_string()),
        }
    }

    #[test]
    fn reads_the_inverse_of_the_opposite_links() {
        let store = MemStore::new();
        let forward: Arc<dyn StorageStrategy> =
            Arc::new(LinkSetStorage::new(forward_attr(), LinkSpec::polymorphic("hasValue")));
        let inverse = ReverseNavigationStorage::new(inverse_attr(), &forward);
        let project_a = ItemKey::new("Project", 1);
        let project_b = ItemKey::new("Project", 2);
        let person = ItemKey::new("Person", 1);

        forward.add(&store, &project_a, AttrValue::Item(person.clone())).unwrap();
        forward.add(&store, &project_b, AttrValue::Item(person.clone())).unwrap();

        assert_eq!(
            inverse.read(&store, &person).unwrap(),
            AttrValue::Collection(vec![
                AttrValue::Item(project_a.clone()),
                AttrValue::Item(project_b.clone()),
            ])
        );
        // Referrers of the inverse walk the forward direction.
        assert_eq!(inverse.referrers(&store, &project_a).unwrap(), vec![person.clone()]);
    }

    #[test]
    fn rejects_every_mutation() {
        let store = MemStore::new();
        let forward: Arc<dyn StorageStrategy> =
            Arc::new(LinkSetStorage::new(forward_attr(), LinkSpec::polymorphic("hasValue")));
        let inverse = ReverseNavigationStorage::new(inverse_attr(), &forward);
        let person = ItemKey::new("Person", 1);
        let value = AttrValue::Collection(vec![AttrValue::Item(ItemKey::new("Project", 1))]);

        assert!(inverse.is_derived());
        let err = inverse.write(&store, &person, value).unwrap_err();
        assert!(matches!(err.violation(), Some(Violation::ReadOnly { .. })));
    }

    #[test]
    fn opposite_without_link_table_reads_empty() {
        let store = MemStore::new();
        let forward: Arc<dyn StorageStrategy> = Arc::new(
            crate::strategy::foreign_key::ForeignKeyStorage::new(forward_attr(), "member"),
        );
        let inverse = ReverseNavigationStorage::new(inverse_attr(), &forward);
        let person = ItemKey::new("Person", 1);
        assert_eq!(
            inverse.read(&store, &person).unwrap(),
            AttrValue::Collection(Vec::new())
        );
        assert!(inverse.preload_contribution().is_none());
    }
}
