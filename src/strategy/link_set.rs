use crate::error::{StorageError, Violation};
use crate::live::{LiveCollection, LiveOps};
use crate::model::{AttrValue, AttributeDescriptor, ItemKey};
use crate::store::{ItemStore, LinkRecord, LinkSpec, PreloadContribution};
use crate::strategy::{
    check_mandatory_floor, check_set_uniqueness, expect_collection, expect_ref, StorageStrategy,
};

/// Unordered to-many references stored as link records in a (possibly shared)
/// link table.
pub struct LinkSetStorage {
    attr: AttributeDescriptor,
    spec: LinkSpec,
    definition: Option<String>,
}

impl LinkSetStorage {
    pub fn new(attr: AttributeDescriptor, spec: LinkSpec) -> Self {
        let definition = if spec.monomorphic { None } else { Some(attr.id.clone()) };
        LinkSetStorage { attr, spec, definition }
    }

    fn definition(&self) -> Option<&str> {
        self.definition.as_deref()
    }

    fn current(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<Vec<LinkRecord>, StorageError> {
        Ok(store.links_from(&self.spec, item, self.definition())?)
    }

    fn link(&self, item: &ItemKey, target: &ItemKey) -> LinkRecord {
        LinkRecord::new(item.clone(), target.clone()).with_definition(self.definition.clone())
    }
}

impl StorageStrategy for LinkSetStorage {
    fn descriptor(&self) -> &AttributeDescriptor {
        &self.attr
    }

    fn read(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<AttrValue, StorageError> {
        let targets =
            self.current(store, item)?.into_iter().map(|l| AttrValue::Item(l.target)).collect();
        Ok(AttrValue::Collection(targets))
    }

    fn validate(
        &self,
        _store: &dyn ItemStore,
        _item: &ItemKey,
        candidate: &AttrValue,
    ) -> Result<(), StorageError> {
        let elements = expect_collection(&self.attr, candidate)?;
        for value in elements {
            expect_ref(&self.attr, value)?;
        }
        check_set_uniqueness(&self.attr, elements)
    }

    /// Symmetric difference against the persisted links: removed links are
    /// deleted first (avoiding transient duplicate-link states), added ones
    /// created afterwards.
    fn write(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: AttrValue,
    ) -> Result<(), StorageError> {
        self.validate(store, item, &value)?;
        let elements = expect_collection(&self.attr, &value)?;
        let mut new_targets = Vec::with_capacity(elements.len());
        for value in elements {
            new_targets.push(expect_ref(&self.attr, value)?.clone());
        }
        let current = self.current(store, item)?;

        for link in &current {
            if let Some(pos) = new_targets.iter().position(|t| *t == link.target) {
                new_targets.remove(pos);
            } else {
                store.delete_link(&self.spec, link)?;
            }
        }
        for target in new_targets {
            store.create_link(&self.spec, self.link(item, &target))?;
        }
        Ok(())
    }

    fn add(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: AttrValue,
    ) -> Result<(), StorageError> {
        let target = expect_ref(&self.attr, &value)?;
        let current = self.current(store, item)?;
        if !self.attr.bag && current.iter().any(|l| l.target == *target) {
            return Err(Violation::Duplicate {
                attr: self.attr.name.clone(),
                value: target.to_string(),
            }
            .into());
        }
        // Legacy single-valued attributes persisted with collection mechanics
        // must not grow a second link.
        if !self.attr.is_collection() && !current.is_empty() {
            return Err(Violation::AlreadyOccupied { attr: self.attr.name.clone() }.into());
        }
        store.create_link(&self.spec, self.link(item, target))?;
        Ok(())
    }

    fn remove(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: &AttrValue,
    ) -> Result<(), StorageError> {
        let target = expect_ref(&self.attr, value)?;
        let current = self.current(store, item)?;
        let Some(link) = current.iter().find(|l| l.target == *target) else {
            return Err(Violation::NotAMember {
                attr: self.attr.name.clone(),
                value: target.to_string(),
            }
            .into());
        };
        check_mandatory_floor(&self.attr, current.len())?;
        store.delete_link(&self.spec, link)?;
        Ok(())
    }

    fn supports_live_view(&self) -> bool {
        true
    }

    fn live_view<'a>(
        &'a self,
        store: &'a dyn ItemStore,
        item: &ItemKey,
    ) -> Result<Option<LiveCollection<'a>>, StorageError> {
        let ops = LinkSetOps { storage: self, item: item.clone() };
        Ok(Some(LiveCollection::new(store, false, Box::new(ops))))
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

/// Live-view callbacks: every mutation is one immediate link-record
/// creation or deletion through the strategy's own constraint checks.
struct LinkSetOps<'a> {
    storage: &'a LinkSetStorage,
    item: ItemKey,
}

impl LiveOps for LinkSetOps<'_> {
    fn snapshot(&self, store: &dyn ItemStore) -> Result<Vec<AttrValue>, StorageError> {
        Ok(self
            .storage
            .current(store, &self.item)?
            .into_iter()
            .map(|l| AttrValue::Item(l.target))
            .collect())
    }

    fn insert(
        &self,
        store: &dyn ItemStore,
        _index: Option<usize>,
        value: &AttrValue,
    ) -> Result<(), StorageError> {
        self.storage.add(store, &self.item, value.clone())
    }

    fn remove(&self, store: &dyn ItemStore, value: &AttrValue) -> Result<(), StorageError> {
        self.storage.remove(store, &self.item, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Multiplicity, ValueType};
    use crate::store::counting::CountingStore;
    use crate::store::mem::MemStore;

    fn attr(mandatory: bool) -> AttributeDescriptor {
        AttributeDescriptor {
            id: "Project#members".to_string(),
            name: "members".to_string(),
            owner_type: "Project".to_string(),
            multiplicity: Multiplicity::Multiple,
            ordered: false,
            bag: false,
            mandatory,
            composite: false,
            value_type: ValueType::Item("Person".to_string()),
        }
    }

    fn persons(ids: &[u64]) -> AttrValue {
        AttrValue::Collection(
            ids.iter().map(|id| AttrValue::Item(ItemKey::new("Person", *id))).collect(),
        )
    }

    #[test]
    fn roundtrip_and_reverse_navigation() {
        let store = MemStore::new();
        let strategy = LinkSetStorage::new(attr(false), LinkSpec::polymorphic("hasValue"));
        let project = ItemKey::new("Project", 1);
        let person = ItemKey::new("Person", 2);

        strategy.add(&store, &project, AttrValue::Item(person.clone())).unwrap();
        assert_eq!(strategy.referrers(&store, &person).unwrap(), vec![project.clone()]);

        strategy.remove(&store, &project, &AttrValue::Item(person.clone())).unwrap();
        assert!(strategy.referrers(&store, &person).unwrap().is_empty());
        assert_eq!(strategy.read(&store, &project).unwrap(), persons(&[]));
    }

    #[test]
    fn duplicate_add_raises_and_leaves_one_link() {
        let store = MemStore::new();
        let strategy = LinkSetStorage::new(attr(false), LinkSpec::polymorphic("hasValue"));
        let project = ItemKey::new("Project", 1);
        let person = AttrValue::Item(ItemKey::new("Person", 2));
        strategy.add(&store, &project, person.clone()).unwrap();
        let err = strategy.add(&store, &project, person.clone()).unwrap_err();
        assert!(matches!(err.violation(), Some(Violation::Duplicate { .. })));
        assert_eq!(strategy.read(&store, &project).unwrap(), persons(&[2]));
    }

    #[test]
    fn mandatory_floor_on_last_member() {
        let store = MemStore::new();
        let strategy = LinkSetStorage::new(attr(true), LinkSpec::polymorphic("hasValue"));
        let project = ItemKey::new("Project", 1);
        let person = AttrValue::Item(ItemKey::new("Person", 2));
        strategy.add(&store, &project, person.clone()).unwrap();
        let err = strategy.remove(&store, &project, &person).unwrap_err();
        assert!(matches!(err.violation(), Some(Violation::MandatoryEmpty { .. })));
        assert_eq!(strategy.read(&store, &project).unwrap(), persons(&[2]));
    }

    #[test]
    fn write_applies_symmetric_difference_only() {
        let mem = MemStore::new();
        let store = CountingStore::new(mem);
        let strategy = LinkSetStorage::new(attr(false), LinkSpec::polymorphic("hasValue"));
        let project = ItemKey::new("Project", 1);

        strategy.write(&store, &project, persons(&[1, 2, 3])).unwrap();
        store.ops.reset();
        strategy.write(&store, &project, persons(&[2, 3, 4])).unwrap();
        // One deletion (1) and one creation (4); 2 and 3 are untouched.
        assert_eq!(store.ops.link_churn(), 2);

        let read = strategy.read(&store, &project).unwrap();
        let mut ids: Vec<u64> = read
            .elements()
            .unwrap()
            .iter()
            .map(|v| v.as_item().unwrap().id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn removing_a_non_member_raises() {
        let store = MemStore::new();
        let strategy = LinkSetStorage::new(attr(false), LinkSpec::polymorphic("hasValue"));
        let project = ItemKey::new("Project", 1);
        let err = strategy
            .remove(&store, &project, &AttrValue::Item(ItemKey::new("Person", 9)))
            .unwrap_err();
        assert!(matches!(err.violation(), Some(Violation::NotAMember { .. })));
    }

    #[test]
    fn live_view_mutates_links_immediately() {
        let store = MemStore::new();
        let strategy = LinkSetStorage::new(attr(false), LinkSpec::polymorphic("hasValue"));
        let project = ItemKey::new("Project", 1);
        let person = AttrValue::Item(ItemKey::new("Person", 2));

        assert!(strategy.supports_live_view());
        let view = strategy.live_view(&store, &project).unwrap().unwrap();
        assert!(!view.is_ordered());
        view.insert(person.clone()).unwrap();
        // Already visible through a plain read, no flush involved.
        assert_eq!(strategy.read(&store, &project).unwrap(), persons(&[2]));

        let err = view.insert(person.clone()).unwrap_err();
        assert!(matches!(err.violation(), Some(Violation::Duplicate { .. })));
        view.remove(&person).unwrap();
        assert!(view.is_empty().unwrap());
    }

    #[test]
    fn polymorphic_table_isolates_attributes() {
        let store = MemStore::new();
        let members = LinkSetStorage::new(attr(false), LinkSpec::polymorphic("hasValue"));
        let mut other_descr = attr(false);
        other_descr.id = "Project#reviewers".to_string();
        other_descr.name = "reviewers".to_string();
        let reviewers = LinkSetStorage::new(other_descr, LinkSpec::polymorphic("hasValue"));
        let project = ItemKey::new("Project", 1);

        members.add(&store, &project, AttrValue::Item(ItemKey::new("Person", 1))).unwrap();
        reviewers.add(&store, &project, AttrValue::Item(ItemKey::new("Person", 2))).unwrap();
        assert_eq!(members.read(&store, &project).unwrap(), persons(&[1]));
        assert_eq!(reviewers.read(&store, &project).unwrap(), persons(&[2]));
    }
}
