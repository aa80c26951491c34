use crate::error::{StorageError, Violation};
use crate::live::LiveCollection;
use crate::model::{AttrValue, AttributeDescriptor, ItemKey};
use crate::store::{ItemStore, LinkSpec, PreloadContribution};
use crate::strategy::{DerivedAlgorithm, StorageStrategy};
use std::sync::Arc;

/// Read-only attribute whose value is computed by a named algorithm instead of
/// being persisted. Every mutation, including validate, is rejected as a
/// read-only violation.
pub struct DerivedStorage {
    attr: AttributeDescriptor,
    algorithm_name: String,
    algorithm: Arc<dyn DerivedAlgorithm>,
}

impl DerivedStorage {
    pub fn new(
        attr: AttributeDescriptor,
        algorithm_name: &str,
        algorithm: Arc<dyn DerivedAlgorithm>,
    ) -> Self {
        DerivedStorage { attr, algorithm_name: algorithm_name.to_string(), algorithm }
    }

    pub fn algorithm_name(&self) -> &str {
        &self.algorithm_name
    }

    fn read_only(&self) -> StorageError {
        Violation::ReadOnly { attr: self.attr.name.clone() }.into()
    }
}

impl StorageStrategy for DerivedStorage {
    fn descriptor(&self) -> &AttributeDescriptor {
        &self.attr
    }

    fn read(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<AttrValue, StorageError> {
        self.algorithm.compute(store, item)
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
}

/// Forwards every operation to another attribute's strategy. Used when two
/// model attributes are views of the same persisted state, e.g. a transient
/// alias routed onto its persistent peer.
pub struct DelegatingStorage {
    attr: AttributeDescriptor,
    target: Arc<dyn StorageStrategy>,
}

impl DelegatingStorage {
    pub fn new(attr: AttributeDescriptor, target: Arc<dyn StorageStrategy>) -> Self {
        DelegatingStorage { attr, target }
    }
}

impl StorageStrategy for DelegatingStorage {
    fn descriptor(&self) -> &AttributeDescriptor {
        &self.attr
    }

    fn read(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<AttrValue, StorageError> {
        self.target.read(store, item)
    }

    fn validate(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        candidate: &AttrValue,
    ) -> Result<(), StorageError> {
        self.target.validate(store, item, candidate)
    }

    fn write(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: AttrValue,
    ) -> Result<(), StorageError> {
        self.target.write(store, item, value)
    }

    fn add(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: AttrValue,
    ) -> Result<(), StorageError> {
        self.target.add(store, item, value)
    }

    fn remove(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: &AttrValue,
    ) -> Result<(), StorageError> {
        self.target.remove(store, item, value)
    }

    fn supports_live_view(&self) -> bool {
        self.target.supports_live_view()
    }

    fn live_view<'a>(
        &'a self,
        store: &'a dyn ItemStore,
        item: &ItemKey,
    ) -> Result<Option<LiveCollection<'a>>, StorageError> {
        self.target.live_view(store, item)
    }

    fn is_derived(&self) -> bool {
        self.target.is_derived()
    }

    fn resort(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<(), StorageError> {
        self.target.resort(store, item)
    }

    fn link_spec(&self) -> Option<&LinkSpec> {
        self.target.link_spec()
    }

    fn referrers(
        &self,
        store: &dyn ItemStore,
        target: &ItemKey,
    ) -> Result<Vec<ItemKey>, StorageError> {
        self.target.referrers(store, target)
    }

    fn preload_contribution(&self) -> Option<PreloadContribution> {
        self.target.preload_contribution()
    }

    fn reverse_preload_contribution(&self) -> Option<PreloadContribution> {
        self.target.reverse_preload_contribution()
    }
}

/// Reads the explicit attribute and falls back to a default-supplying peer
/// when the explicit value is empty. Writes always go to the explicit
/// attribute, so an explicit value shadows the default from then on.
pub struct FallbackStorage {
    attr: AttributeDescriptor,
    primary: Arc<dyn StorageStrategy>,
    default: Arc<dyn StorageStrategy>,
}

impl FallbackStorage {
    pub fn new(
        attr: AttributeDescriptor,
        primary: Arc<dyn StorageStrategy>,
        default: Arc<dyn StorageStrategy>,
    ) -> Self {
        FallbackStorage { attr, primary, default }
    }
}

impl StorageStrategy for FallbackStorage {
    fn descriptor(&self) -> &AttributeDescriptor {
        &self.attr
    }

    fn read(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<AttrValue, StorageError> {
        let explicit = self.primary.read(store, item)?;
        if explicit.is_empty() {
            self.default.read(store, item)
        } else {
            Ok(explicit)
        }
    }

    fn validate(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        candidate: &AttrValue,
    ) -> Result<(), StorageError> {
        self.primary.validate(store, item, candidate)
    }

    fn write(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: AttrValue,
    ) -> Result<(), StorageError> {
        self.primary.write(store, item, value)
    }

    fn add(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: AttrValue,
    ) -> Result<(), StorageError> {
        self.primary.add(store, item, value)
    }

    fn remove(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: &AttrValue,
    ) -> Result<(), StorageError> {
        self.primary.remove(store, item, value)
    }

    fn referrers(
        &self,
        store: &dyn ItemStore,
        target: &ItemKey,
    ) -> Result<Vec<ItemKey>, StorageError> {
        self.primary.referrers(store, target)
    }

    fn preload_contribution(&self) -> Option<PreloadContribution> {
        self.primary.preload_contribution()
    }

    fn reverse_preload_contribution(&self) -> Option<PreloadContribution> {
        self.primary.reverse_preload_contribution()
    }
}
