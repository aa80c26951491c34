use crate::error::StoreError;
use crate::model::ItemKey;
use crate::store::{ItemStore, LinkRecord, LinkSpec, PreloadContribution, StorageValue};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Substrate operation counters, readable while the store is in use.
#[derive(Debug, Default)]
pub struct OpCounters {
    pub links_created: AtomicUsize,
    pub links_deleted: AtomicUsize,
    pub column_writes: AtomicUsize,
    pub column_reads: AtomicUsize,
    pub link_queries: AtomicUsize,
    pub preloads: AtomicUsize,
}

impl OpCounters {
    pub fn link_churn(&self) -> usize {
        self.links_created.load(Ordering::Relaxed) + self.links_deleted.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.links_created.store(0, Ordering::Relaxed);
        self.links_deleted.store(0, Ordering::Relaxed);
        self.column_writes.store(0, Ordering::Relaxed);
        self.column_reads.store(0, Ordering::Relaxed);
        self.link_queries.store(0, Ordering::Relaxed);
        self.preloads.store(0, Ordering::Relaxed);
    }
}

/// Wraps any [`ItemStore`] and counts substrate operations. Used by tests to
/// assert minimal link churn, usable as a cheap probe elsewhere.
pub struct CountingStore<S> {
    inner: S,
    pub ops: OpCounters,
}

impl<S: ItemStore> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        CountingStore { inner, ops: OpCounters::default() }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl<S: ItemStore> ItemStore for CountingStore<S> {
    fn column(&self, item: &ItemKey, column: &str) -> Result<Option<StorageValue>, StoreError> {
        Self::bump(&self.ops.column_reads);
        self.inner.column(item, column)
    }

    fn set_column(
        &self,
        item: &ItemKey,
        column: &str,
        value: Option<StorageValue>,
    ) -> Result<(), StoreError> {
        Self::bump(&self.ops.column_writes);
        self.inner.set_column(item, column, value)
    }

    fn is_row_column(&self, type_name: &str, column: &str) -> bool {
        self.inner.is_row_column(type_name, column)
    }

    fn create_link(&self, spec: &LinkSpec, link: LinkRecord) -> Result<(), StoreError> {
        Self::bump(&self.ops.links_created);
        self.inner.create_link(spec, link)
    }

    fn delete_link(&self, spec: &LinkSpec, link: &LinkRecord) -> Result<bool, StoreError> {
        Self::bump(&self.ops.links_deleted);
        self.inner.delete_link(spec, link)
    }

    fn links_from(
        &self,
        spec: &LinkSpec,
        source: &ItemKey,
        definition: Option<&str>,
    ) -> Result<Vec<LinkRecord>, StoreError> {
        Self::bump(&self.ops.link_queries);
        self.inner.links_from(spec, source, definition)
    }

    fn links_to(
        &self,
        spec: &LinkSpec,
        target: &ItemKey,
        definition: Option<&str>,
    ) -> Result<Vec<LinkRecord>, StoreError> {
        Self::bump(&self.ops.link_queries);
        self.inner.links_to(spec, target, definition)
    }

    fn referrers_by_column(
        &self,
        column: &str,
        value: &StorageValue,
        definition_column: Option<&str>,
        definition: Option<&str>,
    ) -> Result<Vec<ItemKey>, StoreError> {
        Self::bump(&self.ops.link_queries);
        self.inner.referrers_by_column(column, value, definition_column, definition)
    }

    fn preload(
        &self,
        contribution: &PreloadContribution,
        items: &[ItemKey],
    ) -> Result<(), StoreError> {
        Self::bump(&self.ops.preloads);
        self.inner.preload(contribution, items)
    }
}
