use crate::error::{StorageError, Violation};
use crate::live::{LiveCollection, LiveOps};
use crate::model::{AttrValue, AttributeDescriptor, ItemKey};
use crate::store::{ItemStore, PreloadContribution, StorageValue};
use crate::strategy::{
    check_mandatory_floor, check_set_uniqueness, expect_collection, expect_ref, StorageStrategy,
};

/// Shared mechanics of the inline-reference strategies: the collection is not
/// stored on the owner at all but as a back-reference column on each member,
/// optionally disambiguated by a definition column when several attributes
/// share the container column. Membership is exclusive; a member belongs to at
/// most one container through one attribute at a time.
struct InlineRef {
    attr: AttributeDescriptor,
    container_column: String,
    definition_column: Option<String>,
    order_column: Option<String>,
}

impl InlineRef {
    fn definition_key(&self) -> Option<&str> {
        self.definition_column.as_deref().map(|_| self.attr.id.as_str())
    }

    /// Members of `item` with their stored order keys, sorted by order column
    /// (when ordered), ties and the unordered case by item key.
    fn keyed_members(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
    ) -> Result<Vec<(Option<i64>, ItemKey)>, StorageError> {
        let members = store.referrers_by_column(
            &self.container_column,
            &StorageValue::Key(item.clone()),
            self.definition_column.as_deref(),
            self.definition_key(),
        )?;
        let Some(order_column) = &self.order_column else {
            return Ok(members.into_iter().map(|member| (None, member)).collect());
        };
        let mut keyed = Vec::with_capacity(members.len());
        for member in members {
            let order = match store.column(&member, order_column)? {
                Some(StorageValue::Int(order)) => Some(order),
                None => None,
                Some(other) => {
                    return Err(StorageError::Integrity(format!(
                        "order column {} of {} holds non-integer value {}",
                        order_column, member, other
                    )))
                }
            };
            keyed.push((order, member));
        }
        keyed.sort();
        Ok(keyed)
    }

    fn members(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<Vec<ItemKey>, StorageError> {
        Ok(self.keyed_members(store, item)?.into_iter().map(|(_, member)| member).collect())
    }

    /// Writes the canonical dense order keys by list position, skipping
    /// members whose stored key already matches.
    fn renumber(
        &self,
        store: &dyn ItemStore,
        members: &[(Option<i64>, ItemKey)],
    ) -> Result<(), StorageError> {
        let Some(column) = &self.order_column else {
            return Ok(());
        };
        for (position, (stored, member)) in members.iter().enumerate() {
            let canonical = position as i64;
            if *stored != Some(canonical) {
                store.set_column(member, column, Some(StorageValue::Int(canonical)))?;
            }
        }
        Ok(())
    }

    /// Container currently claiming `member` through this attribute family's
    /// column, together with the definition key it was claimed under.
    fn claim_of(
        &self,
        store: &dyn ItemStore,
        member: &ItemKey,
    ) -> Result<Option<(ItemKey, Option<String>)>, StorageError> {
        let container = match store.column(member, &self.container_column)? {
            None => return Ok(None),
            Some(StorageValue::Key(container)) => container,
            Some(other) => {
                return Err(StorageError::Integrity(format!(
                    "container column {} of {} holds non-key value {}",
                    self.container_column, member, other
                )))
            }
        };
        let definition = match &self.definition_column {
            None => None,
            Some(column) => match store.column(member, column)? {
                None => None,
                Some(StorageValue::Text(definition)) => Some(definition),
                Some(other) => {
                    return Err(StorageError::Integrity(format!(
                        "definition column {} of {} holds non-text value {}",
                        column, member, other
                    )))
                }
            },
        };
        Ok(Some((container, definition)))
    }

    /// Fails when `member` is already claimed by another container, or by the
    /// same container through a different attribute sharing the column.
    fn check_free(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        member: &ItemKey,
    ) -> Result<(), StorageError> {
        match self.claim_of(store, member)? {
            None => Ok(()),
            Some((container, definition)) => {
                if container == *item && definition.as_deref() == self.definition_key() {
                    return Ok(());
                }
                Err(Violation::OwnershipConflict {
                    attr: self.attr.name.clone(),
                    target: member.to_string(),
                    current_owner: container.to_string(),
                }
                .into())
            }
        }
    }

    /// Claims `member` for `item` by writing its back-reference columns. The
    /// container column is written first; failures on the follow-up columns
    /// roll the claim back best-effort before re-raising.
    fn attach(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        member: &ItemKey,
        order: Option<i64>,
    ) -> Result<(), StorageError> {
        self.check_free(store, item, member)?;
        store.set_column(member, &self.container_column, Some(StorageValue::Key(item.clone())))?;
        let followup = self.attach_followup(store, member, order);
        if let Err(err) = followup {
            let _ = store.set_column(member, &self.container_column, None);
            return Err(err);
        }
        Ok(())
    }

    fn attach_followup(
        &self,
        store: &dyn ItemStore,
        member: &ItemKey,
        order: Option<i64>,
    ) -> Result<(), StorageError> {
        if let Some(column) = &self.definition_column {
            store.set_column(
                member,
                column,
                Some(StorageValue::Text(self.attr.id.clone())),
            )?;
        }
        if let Some(column) = &self.order_column {
            store.set_column(member, column, order.map(StorageValue::Int))?;
        }
        Ok(())
    }

    fn detach(&self, store: &dyn ItemStore, member: &ItemKey) -> Result<(), StorageError> {
        if let Some(column) = &self.order_column {
            store.set_column(member, column, None)?;
        }
        if let Some(column) = &self.definition_column {
            store.set_column(member, column, None)?;
        }
        store.set_column(member, &self.container_column, None)?;
        Ok(())
    }

    fn read(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<AttrValue, StorageError> {
        let members =
            self.members(store, item)?.into_iter().map(AttrValue::Item).collect();
        Ok(AttrValue::Collection(members))
    }

    fn validate(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        candidate: &AttrValue,
    ) -> Result<(), StorageError> {
        let elements = expect_collection(&self.attr, candidate)?;
        for element in elements {
            let member = expect_ref(&self.attr, element)?;
            self.check_free(store, item, member)?;
        }
        check_set_uniqueness(&self.attr, elements)
    }

    /// Bulk replace: detach leavers, attach joiners, then renumber the order
    /// column to the list position (ordered variant only). The mandatory floor
    /// does not apply to a full replace.
    fn write(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: AttrValue,
    ) -> Result<(), StorageError> {
        self.validate(store, item, &value)?;
        let elements = expect_collection(&self.attr, &value)?;
        let mut new_members = Vec::with_capacity(elements.len());
        for element in elements {
            new_members.push(expect_ref(&self.attr, element)?.clone());
        }
        let current = self.keyed_members(store, item)?;
        for (_, member) in &current {
            if !new_members.contains(member) {
                self.detach(store, member)?;
            }
        }
        for (index, member) in new_members.iter().enumerate() {
            let order = self.order_column.as_ref().map(|_| index as i64);
            match current.iter().find(|(_, m)| m == member) {
                Some((stored, _)) => {
                    // Survivors only get an order write when their key moved.
                    if let Some(column) = &self.order_column {
                        if *stored != order {
                            store.set_column(member, column, order.map(StorageValue::Int))?;
                        }
                    }
                }
                None => self.attach(store, item, member, order)?,
            }
        }
        Ok(())
    }

    fn add(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: AttrValue,
        index: Option<usize>,
    ) -> Result<(), StorageError> {
        let member = expect_ref(&self.attr, &value)?;
        let current = self.keyed_members(store, item)?;
        if current.iter().any(|(_, m)| m == member) {
            return Err(Violation::Duplicate {
                attr: self.attr.name.clone(),
                value: member.to_string(),
            }
            .into());
        }
        match index {
            None => {
                // Append past the highest stored key; removals leave gaps, so
                // the member count is no substitute for the maximum.
                let next =
                    current.iter().filter_map(|(o, _)| *o).max().map(|o| o + 1).unwrap_or(0);
                self.attach(store, item, member, self.order_column.as_ref().map(|_| next))
            }
            Some(index) => {
                if index > current.len() {
                    return Err(StorageError::IllegalArgument(format!(
                        "index {} out of bounds for {} members",
                        index,
                        current.len()
                    )));
                }
                self.attach(store, item, member, Some(index as i64))?;
                // Stored keys may have drifted apart; renumber every member
                // by its actual position instead of shifting by index.
                let mut with_new = current;
                with_new.insert(index, (Some(index as i64), member.clone()));
                self.renumber(store, &with_new)
            }
        }
    }

    fn remove(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: &AttrValue,
    ) -> Result<(), StorageError> {
        let member = expect_ref(&self.attr, value)?;
        let current = self.members(store, item)?;
        if !current.contains(member) {
            return Err(Violation::NotAMember {
                attr: self.attr.name.clone(),
                value: member.to_string(),
            }
            .into());
        }
        check_mandatory_floor(&self.attr, current.len())?;
        self.detach(store, member)
    }

    fn resort(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<(), StorageError> {
        if self.order_column.is_none() {
            return Err(StorageError::IllegalArgument(format!(
                "attribute {} is not ordered",
                self.attr.name
            )));
        }
        let members = self.keyed_members(store, item)?;
        self.renumber(store, &members)
    }

    fn referrers(
        &self,
        store: &dyn ItemStore,
        target: &ItemKey,
    ) -> Result<Vec<ItemKey>, StorageError> {
        Ok(self
            .claim_of(store, target)?
            .filter(|(_, definition)| definition.as_deref() == self.definition_key())
            .map(|(container, _)| container)
            .into_iter()
            .collect())
    }

    fn preload_contribution(&self) -> Option<PreloadContribution> {
        Some(PreloadContribution::Columns { column: self.container_column.clone() })
    }
}

struct InlineOps<'a> {
    inner: &'a InlineRef,
    item: ItemKey,
}

impl LiveOps for InlineOps<'_> {
    fn snapshot(&self, store: &dyn ItemStore) -> Result<Vec<AttrValue>, StorageError> {
        Ok(self.inner.members(store, &self.item)?.into_iter().map(AttrValue::Item).collect())
    }

    fn insert(
        &self,
        store: &dyn ItemStore,
        index: Option<usize>,
        value: &AttrValue,
    ) -> Result<(), StorageError> {
        self.inner.add(store, &self.item, value.clone(), index)
    }

    fn remove(&self, store: &dyn ItemStore, value: &AttrValue) -> Result<(), StorageError> {
        self.inner.remove(store, &self.item, value)
    }
}

/// Unordered collection through back-reference columns on the members.
pub struct InlineSetStorage {
    inner: InlineRef,
}

impl InlineSetStorage {
    pub fn new(
        attr: AttributeDescriptor,
        container_column: &str,
        definition_column: Option<&str>,
    ) -> Self {
        InlineSetStorage {
            inner: InlineRef {
                attr,
                container_column: container_column.to_string(),
                definition_column: definition_column.map(str::to_string),
                order_column: None,
            },
        }
    }
}

impl StorageStrategy for InlineSetStorage {
    fn descriptor(&self) -> &AttributeDescriptor {
        &self.inner.attr
    }

    fn read(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<AttrValue, StorageError> {
        self.inner.read(store, item)
    }

    fn validate(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        candidate: &AttrValue,
    ) -> Result<(), StorageError> {
        self.inner.validate(store, item, candidate)
    }

    fn write(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: AttrValue,
    ) -> Result<(), StorageError> {
        self.inner.write(store, item, value)
    }

    fn add(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: AttrValue,
    ) -> Result<(), StorageError> {
        self.inner.add(store, item, value, None)
    }

    fn remove(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: &AttrValue,
    ) -> Result<(), StorageError> {
        self.inner.remove(store, item, value)
    }

    fn supports_live_view(&self) -> bool {
        true
    }

    fn live_view<'a>(
        &'a self,
        store: &'a dyn ItemStore,
        item: &ItemKey,
    ) -> Result<Option<LiveCollection<'a>>, StorageError> {
        let ops = InlineOps { inner: &self.inner, item: item.clone() };
        Ok(Some(LiveCollection::new(store, false, Box::new(ops))))
    }

    fn referrers(
        &self,
        store: &dyn ItemStore,
        target: &ItemKey,
    ) -> Result<Vec<ItemKey>, StorageError> {
        self.inner.referrers(store, target)
    }

    fn preload_contribution(&self) -> Option<PreloadContribution> {
        self.inner.preload_contribution()
    }

    fn reverse_preload_contribution(&self) -> Option<PreloadContribution> {
        self.inner.preload_contribution()
    }
}

/// Ordered collection through back-reference plus order columns on the
/// members.
pub struct InlineListStorage {
    inner: InlineRef,
}

impl InlineListStorage {
    pub fn new(
        attr: AttributeDescriptor,
        container_column: &str,
        definition_column: Option<&str>,
        order_column: &str,
    ) -> Self {
        InlineListStorage {
            inner: InlineRef {
                attr,
                container_column: container_column.to_string(),
                definition_column: definition_column.map(str::to_string),
                order_column: Some(order_column.to_string()),
            },
        }
    }
}

impl StorageStrategy for InlineListStorage {
    fn descriptor(&self) -> &AttributeDescriptor {
        &self.inner.attr
    }

    fn read(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<AttrValue, StorageError> {
        self.inner.read(store, item)
    }

    fn validate(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        candidate: &AttrValue,
    ) -> Result<(), StorageError> {
        self.inner.validate(store, item, candidate)
    }

    fn write(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: AttrValue,
    ) -> Result<(), StorageError> {
        self.inner.write(store, item, value)
    }

    fn add(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: AttrValue,
    ) -> Result<(), StorageError> {
        self.inner.add(store, item, value, None)
    }

    fn remove(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: &AttrValue,
    ) -> Result<(), StorageError> {
        self.inner.remove(store, item, value)
    }

    fn supports_live_view(&self) -> bool {
        true
    }

    fn live_view<'a>(
        &'a self,
        store: &'a dyn ItemStore,
        item: &ItemKey,
    ) -> Result<Option<LiveCollection<'a>>, StorageError> {
        let ops = InlineOps { inner: &self.inner, item: item.clone() };
        Ok(Some(LiveCollection::new(store, true, Box::new(ops))))
    }

    fn resort(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<(), StorageError> {
        self.inner.resort(store, item)
    }

    fn referrers(
        &self,
        store: &dyn ItemStore,
        target: &ItemKey,
    ) -> Result<Vec<ItemKey>, StorageError> {
        self.inner.referrers(store, target)
    }

    fn preload_contribution(&self) -> Option<PreloadContribution> {
        self.inner.preload_contribution()
    }

    fn reverse_preload_contribution(&self) -> Option<PreloadContribution> {
        self.inner.preload_contribution()
    }
}
