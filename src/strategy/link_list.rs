use crate::error::{StorageError, Violation};
use crate::live::{LiveCollection, LiveOps};
use crate::model::{AttrValue, AttributeDescriptor, ItemKey};
use crate::store::{ItemStore, LinkRecord, LinkSpec, PreloadContribution};
use crate::strategy::{
    check_mandatory_floor, check_set_uniqueness, expect_collection, expect_ref, StorageStrategy,
};

/// Ordered to-many references as link records carrying an order key. Reads
/// return targets sorted by order key; writes align position by position
/// against the persisted list so a reorder or small edit only touches the
/// links that actually changed.
pub struct LinkListStorage {
    attr: AttributeDescriptor,
    spec: LinkSpec,
    definition: Option<String>,
}

impl LinkListStorage {
    pub fn new(attr: AttributeDescriptor, spec: LinkSpec) -> Self {
        let definition = if spec.monomorphic { None } else { Some(attr.id.clone()) };
        LinkListStorage { attr, spec, definition }
    }

    fn definition(&self) -> Option<&str> {
        self.definition.as_deref()
    }

    fn current(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<Vec<LinkRecord>, StorageError> {
        Ok(store.links_from(&self.spec, item, self.definition())?)
    }

    fn link(&self, item: &ItemKey, target: &ItemKey, order: i64) -> LinkRecord {
        LinkRecord::new(item.clone(), target.clone())
            .with_order(order)
            .with_definition(self.definition.clone())
    }

    fn targets(&self, value: &AttrValue) -> Result<Vec<ItemKey>, StorageError> {
        let elements = expect_collection(&self.attr, value)?;
        let mut targets = Vec::with_capacity(elements.len());
        for element in elements {
            targets.push(expect_ref(&self.attr, element)?.clone());
        }
        Ok(targets)
    }
}

impl StorageStrategy for LinkListStorage {
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
        for element in elements {
            expect_ref(&self.attr, element)?;
        }
        check_set_uniqueness(&self.attr, elements)
    }

    /// Positional alignment against the persisted list. A position whose
    /// target is unchanged keeps its link and its order key; a changed
    /// position deletes the old link and re-creates it under the old order
    /// key; trailing surplus is deleted; an extension appends with order keys
    /// continuing past the highest kept one.
    fn write(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: AttrValue,
    ) -> Result<(), StorageError> {
        self.validate(store, item, &value)?;
        let new_targets = self.targets(&value)?;
        let current = self.current(store, item)?;

        let shared = current.len().min(new_targets.len());
        let mut last_order = -1i64;
        for (link, target) in current.iter().zip(&new_targets).take(shared) {
            let order = link.order.unwrap_or(last_order + 1);
            if link.target != *target {
                store.delete_link(&self.spec, link)?;
                store.create_link(&self.spec, self.link(item, target, order))?;
            }
            last_order = order;
        }
        for link in &current[shared..] {
            store.delete_link(&self.spec, link)?;
        }
        for target in &new_targets[shared..] {
            last_order += 1;
            store.create_link(&self.spec, self.link(item, target, last_order))?;
        }
        Ok(())
    }

    /// Appends at the end: one link creation past the highest order key.
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
        let next = current.iter().filter_map(|l| l.order).max().map(|o| o + 1).unwrap_or(0);
        store.create_link(&self.spec, self.link(item, target, next))?;
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

    /// Renumbers order keys densely by list position. Order keys drift apart
    /// through incremental edits; resorting restores the canonical 0..n keys
    /// without changing the observed order.
    fn resort(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<(), StorageError> {
        for (index, link) in self.current(store, item)?.into_iter().enumerate() {
            let canonical = index as i64;
            if link.order != Some(canonical) {
                store.delete_link(&self.spec, &link)?;
                store.create_link(&self.spec, self.link(item, &link.target, canonical))?;
            }
        }
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
        let ops = LinkListOps { storage: self, item: item.clone() };
        Ok(Some(LiveCollection::new(store, true, Box::new(ops))))
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

/// Live-view callbacks over the link list. An appending insert is one link
/// creation; a positional insert replays the whole list through the aligning
/// write, which only touches the shifted suffix.
struct LinkListOps<'a> {
    storage: &'a LinkListStorage,
    item: ItemKey,
}

impl LiveOps for LinkListOps<'_> {
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
        index: Option<usize>,
        value: &AttrValue,
    ) -> Result<(), StorageError> {
        match index {
            None => self.storage.add(store, &self.item, value.clone()),
            Some(index) => {
                let mut targets = self.snapshot(store)?;
                if index > targets.len() {
                    return Err(StorageError::IllegalArgument(format!(
                        "index {} out of bounds for {} members",
                        index,
                        targets.len()
                    )));
                }
                targets.insert(index, value.clone());
                self.storage.write(store, &self.item, AttrValue::Collection(targets))
            }
        }
    }

    fn remove(&self, store: &dyn ItemStore, value: &AttrValue) -> Result<(), StorageError> {
        self.storage.remove(store, &self.item, value)
    }
}
