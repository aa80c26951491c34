use crate::error::StoreError;
use crate::model::ItemKey;
use crate::store::{ItemStore, LinkRecord, LinkSpec, PreloadContribution, StorageValue};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct MemInner {
    /// Reserved row columns per structured type.
    row_columns: HashMap<String, BTreeSet<String>>,
    /// Reserved row column values, keyed by `(item, column)`.
    columns: BTreeMap<(ItemKey, String), StorageValue>,
    /// Flex/side storage for columns no type reserves a row column for.
    flex: BTreeMap<(ItemKey, String), StorageValue>,
    /// Link records per link table.
    links: BTreeMap<String, Vec<LinkRecord>>,
}

/// In-memory item/link store, the reference substrate and test double.
/// Interior mutability keeps every operation at `&self`, matching the
/// stateless-strategy contract.
#[derive(Debug, Default)]
pub struct MemStore {
    inner: RwLock<MemInner>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore::default()
    }

    /// Declares the reserved row columns of a structured type. Columns not
    /// declared here transparently fall back to flex/side storage.
    pub fn declare_type(&self, type_name: &str, row_columns: &[&str]) {
        if let Ok(mut inner) = self.inner.write() {
            let set = inner.row_columns.entry(type_name.to_string()).or_default();
            for column in row_columns {
                set.insert((*column).to_string());
            }
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemInner>, StoreError> {
        Ok(self.inner.read()?)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemInner>, StoreError> {
        Ok(self.inner.write()?)
    }
}

impl MemInner {
    fn is_row_column(&self, type_name: &str, column: &str) -> bool {
        self.row_columns.get(type_name).map(|set| set.contains(column)).unwrap_or(false)
    }

    fn links_of(&self, spec: &LinkSpec) -> &[LinkRecord] {
        self.links.get(&spec.table).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl ItemStore for MemStore {
    fn column(&self, item: &ItemKey, column: &str) -> Result<Option<StorageValue>, StoreError> {
        let inner = self.read()?;
        let key = (item.clone(), column.to_string());
        Ok(inner.columns.get(&key).or_else(|| inner.flex.get(&key)).cloned())
    }

    fn set_column(
        &self,
        item: &ItemKey,
        column: &str,
        value: Option<StorageValue>,
    ) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        let row = inner.is_row_column(&item.type_name, column);
        let key = (item.clone(), column.to_string());
        let slot = if row { &mut inner.columns } else { &mut inner.flex };
        match value {
            Some(value) => {
                slot.insert(key, value);
            }
            None => {
                slot.remove(&key);
            }
        }
        Ok(())
    }

    fn is_row_column(&self, type_name: &str, column: &str) -> bool {
        self.read().map(|inner| inner.is_row_column(type_name, column)).unwrap_or(false)
    }

    fn create_link(&self, spec: &LinkSpec, link: LinkRecord) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        inner.links.entry(spec.table.clone()).or_default().push(link);
        Ok(())
    }

    fn delete_link(&self, spec: &LinkSpec, link: &LinkRecord) -> Result<bool, StoreError> {
        let mut inner = self.write()?;
        let Some(records) = inner.links.get_mut(&spec.table) else {
            return Ok(false);
        };
        match records.iter().position(|r| r == link) {
            Some(pos) => {
                records.remove(pos);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn links_from(
        &self,
        spec: &LinkSpec,
        source: &ItemKey,
        definition: Option<&str>,
    ) -> Result<Vec<LinkRecord>, StoreError> {
        let inner = self.read()?;
        let mut hits: Vec<LinkRecord> = inner
            .links_of(spec)
            .iter()
            .filter(|r| r.source == *source && r.matches_definition(definition))
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.order_cmp(b));
        Ok(hits)
    }

    fn links_to(
        &self,
        spec: &LinkSpec,
        target: &ItemKey,
        definition: Option<&str>,
    ) -> Result<Vec<LinkRecord>, StoreError> {
        let inner = self.read()?;
        let mut hits: Vec<LinkRecord> = inner
            .links_of(spec)
            .iter()
            .filter(|r| r.target == *target && r.matches_definition(definition))
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.order_cmp(b));
        Ok(hits)
    }

    fn referrers_by_column(
        &self,
        column: &str,
        value: &StorageValue,
        definition_column: Option<&str>,
        definition: Option<&str>,
    ) -> Result<Vec<ItemKey>, StoreError> {
        let inner = self.read()?;
        let mut hits = BTreeSet::new();
        for ((item, col), stored) in inner.columns.iter().chain(inner.flex.iter()) {
            if col != column || stored != value {
                continue;
            }
            if let Some(def_col) = definition_column {
                let key = (item.clone(), def_col.to_string());
                let stored_def = inner.columns.get(&key).or_else(|| inner.flex.get(&key));
                let matches = match (stored_def, definition) {
                    (None, None) => true,
                    (Some(StorageValue::Text(d)), Some(expected)) => d == expected,
                    _ => false,
                };
                if !matches {
                    continue;
                }
            }
            hits.insert(item.clone());
        }
        Ok(hits.into_iter().collect())
    }

    fn preload(
        &self,
        _contribution: &PreloadContribution,
        _items: &[ItemKey],
    ) -> Result<(), StoreError> {
        // Everything is resident; accepting the contribution is enough.
        Ok(())
    }
}
