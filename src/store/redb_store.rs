use crate::error::StoreError;
use crate::model::ItemKey;
use crate::store::{ItemStore, LinkRecord, LinkSpec, PreloadContribution, StorageValue};
use bincode::{Decode, Encode};
use redb::{Database, Key, MultimapTableDefinition, ReadableTable, TableDefinition, TypeName, Value};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::RwLock;
use std::{env, fs};

/// Implements `redb::Value`/`redb::Key` over the bincode encoding of a type.
/// Byte-wise comparison only has to be a total order, not a semantic one.
macro_rules! bincode_value {
    ($t:ty, $name:expr) => {
        impl Value for $t {
            type SelfType<'a>
                = $t
            where
                Self: 'a;
            type AsBytes<'a>
                = Vec<u8>
            where
                Self: 'a;

            fn fixed_width() -> Option<usize> {
                None
            }

            fn from_bytes<'a>(data: &'a [u8]) -> $t
            where
                Self: 'a,
            {
                let (value, _) = bincode::decode_from_slice(data, bincode::config::standard())
                    .expect("corrupt stored value");
                value
            }

            fn as_bytes<'a, 'b: 'a>(value: &'a Self::SelfType<'b>) -> Vec<u8>
            where
                Self: 'a,
                Self: 'b,
            {
                bincode::encode_to_vec(value, bincode::config::standard())
                    .expect("value encoding")
            }

            fn type_name() -> TypeName {
                TypeName::new($name)
            }
        }

        impl Key for $t {
            fn compare(data1: &[u8], data2: &[u8]) -> std::cmp::Ordering {
                data1.cmp(data2)
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
struct ColumnKey {
    item: ItemKey,
    column: String,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
struct IndexKey {
    column: String,
    value: StorageValue,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
struct EndKey {
    table: String,
    item: ItemKey,
}

bincode_value!(ItemKey, "attrbit::ItemKey");
bincode_value!(StorageValue, "attrbit::StorageValue");
bincode_value!(ColumnKey, "attrbit::ColumnKey");
bincode_value!(IndexKey, "attrbit::IndexKey");
bincode_value!(EndKey, "attrbit::EndKey");
bincode_value!(LinkRecord, "attrbit::LinkRecord");

const COLUMNS: TableDefinition<ColumnKey, StorageValue> = TableDefinition::new("attr_columns");
const COLUMN_INDEX: MultimapTableDefinition<IndexKey, ItemKey> =
    MultimapTableDefinition::new("attr_column_index");
const LINKS_FROM: MultimapTableDefinition<EndKey, LinkRecord> =
    MultimapTableDefinition::new("attr_links_from");
const LINKS_TO: MultimapTableDefinition<EndKey, LinkRecord> =
    MultimapTableDefinition::new("attr_links_to");

/// redb-backed item/link store. Columns live in one table plus a value index
/// for reverse column queries; links are mirrored into a by-source and a
/// by-target multimap. Every operation runs its own transaction; atomicity
/// across several operations is the caller's business.
pub struct RedbStore {
    db: Database,
    row_columns: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl RedbStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path)?;
        // Open every table once so reads never race table creation.
        let tx = db.begin_write()?;
        {
            tx.open_table(COLUMNS)?;
            tx.open_multimap_table(COLUMN_INDEX)?;
            tx.open_multimap_table(LINKS_FROM)?;
            tx.open_multimap_table(LINKS_TO)?;
        }
        tx.commit()?;
        Ok(RedbStore { db, row_columns: RwLock::new(HashMap::new()) })
    }

    /// Fresh store under the system temp dir, randomized per call.
    pub fn temp(name: &str) -> Result<Self, StoreError> {
        let dir = env::temp_dir().join("attrbit");
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}_{}.db", name, rand::random::<u64>()));
        Self::open(path)
    }

    /// Declares the reserved row columns of a structured type; purely
    /// declarative here, the physical layout stores all columns alike.
    pub fn declare_type(&self, type_name: &str, row_columns: &[&str]) {
        if let Ok(mut declared) = self.row_columns.write() {
            let set = declared.entry(type_name.to_string()).or_default();
            for column in row_columns {
                set.insert((*column).to_string());
            }
        }
    }
}

impl ItemStore for RedbStore {
    fn column(&self, item: &ItemKey, column: &str) -> Result<Option<StorageValue>, StoreError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(COLUMNS)?;
        let key = ColumnKey { item: item.clone(), column: column.to_string() };
        Ok(table.get(&key)?.map(|guard| guard.value()))
    }

    fn set_column(
        &self,
        item: &ItemKey,
        column: &str,
        value: Option<StorageValue>,
    ) -> Result<(), StoreError> {
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(COLUMNS)?;
            let mut index = tx.open_multimap_table(COLUMN_INDEX)?;
            let key = ColumnKey { item: item.clone(), column: column.to_string() };
            let old = table.get(&key)?.map(|guard| guard.value());
            if let Some(old) = old {
                index.remove(&IndexKey { column: column.to_string(), value: old }, item)?;
            }
            match value {
                Some(value) => {
                    index.insert(&IndexKey { column: column.to_string(), value: value.clone() }, item)?;
                    table.insert(&key, &value)?;
                }
                None => {
                    table.remove(&key)?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn is_row_column(&self, type_name: &str, column: &str) -> bool {
        self.row_columns
            .read()
            .map(|declared| {
                declared.get(type_name).map(|set| set.contains(column)).unwrap_or(false)
            })
            .unwrap_or(false)
    }

    fn create_link(&self, spec: &LinkSpec, link: LinkRecord) -> Result<(), StoreError> {
        let tx = self.db.begin_write()?;
        {
            let mut from = tx.open_multimap_table(LINKS_FROM)?;
            let mut to = tx.open_multimap_table(LINKS_TO)?;
            from.insert(&EndKey { table: spec.table.clone(), item: link.source.clone() }, &link)?;
            to.insert(&EndKey { table: spec.table.clone(), item: link.target.clone() }, &link)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_link(&self, spec: &LinkSpec, link: &LinkRecord) -> Result<bool, StoreError> {
        let tx = self.db.begin_write()?;
        let existed;
        {
            let mut from = tx.open_multimap_table(LINKS_FROM)?;
            let mut to = tx.open_multimap_table(LINKS_TO)?;
            existed =
                from.remove(&EndKey { table: spec.table.clone(), item: link.source.clone() }, link)?;
            to.remove(&EndKey { table: spec.table.clone(), item: link.target.clone() }, link)?;
        }
        tx.commit()?;
        Ok(existed)
    }

    fn links_from(
        &self,
        spec: &LinkSpec,
        source: &ItemKey,
        definition: Option<&str>,
    ) -> Result<Vec<LinkRecord>, StoreError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_multimap_table(LINKS_FROM)?;
        collect_links(
            table.get(&EndKey { table: spec.table.clone(), item: source.clone() })?,
            definition,
        )
    }

    fn links_to(
        &self,
        spec: &LinkSpec,
        target: &ItemKey,
        definition: Option<&str>,
    ) -> Result<Vec<LinkRecord>, StoreError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_multimap_table(LINKS_TO)?;
        collect_links(
            table.get(&EndKey { table: spec.table.clone(), item: target.clone() })?,
            definition,
        )
    }

    fn referrers_by_column(
        &self,
        column: &str,
        value: &StorageValue,
        definition_column: Option<&str>,
        definition: Option<&str>,
    ) -> Result<Vec<ItemKey>, StoreError> {
        let tx = self.db.begin_read()?;
        let index = tx.open_multimap_table(COLUMN_INDEX)?;
        let columns = tx.open_table(COLUMNS)?;
        let mut hits = BTreeSet::new();
        let mut entries =
            index.get(&IndexKey { column: column.to_string(), value: value.clone() })?;
        while let Some(entry) = entries.next() {
            let item = entry?.value();
            if let Some(def_col) = definition_column {
                let key = ColumnKey { item: item.clone(), column: def_col.to_string() };
                let stored_def = columns.get(&key)?.map(|guard| guard.value());
                let matches = match (stored_def, definition) {
                    (None, None) => true,
                    (Some(StorageValue::Text(d)), Some(expected)) => d == expected,
                    _ => false,
                };
                if !matches {
                    continue;
                }
            }
            hits.insert(item);
        }
        Ok(hits.into_iter().collect())
    }

    fn preload(
        &self,
        contribution: &PreloadContribution,
        items: &[ItemKey],
    ) -> Result<(), StoreError> {
        // One bulk read transaction instead of one transaction per item.
        let tx = self.db.begin_read()?;
        match contribution {
            PreloadContribution::Links { spec, definition, reverse } => {
                let def = MultimapTableDefinition::<EndKey, LinkRecord>::new(if *reverse {
                    "attr_links_to"
                } else {
                    "attr_links_from"
                });
                let table = tx.open_multimap_table(def)?;
                for item in items {
                    let entries =
                        table.get(&EndKey { table: spec.table.clone(), item: item.clone() })?;
                    collect_links(entries, definition.as_deref())?;
                }
            }
            PreloadContribution::Columns { column } => {
                let table = tx.open_table(COLUMNS)?;
                for item in items {
                    let key = ColumnKey { item: item.clone(), column: column.clone() };
                    table.get(&key)?;
                }
            }
        }
        Ok(())
    }
}

fn collect_links(
    mut entries: redb::MultimapValue<'_, LinkRecord>,
    definition: Option<&str>,
) -> Result<Vec<LinkRecord>, StoreError> {
    let mut links = Vec::new();
    while let Some(entry) = entries.next() {
        let link = entry?.value();
        let matches = match definition {
            None => true,
            Some(d) => link.definition.as_deref() == Some(d),
        };
        if matches {
            links.push(link);
        }
    }
    links.sort_by(|a, b| a.order_cmp(b));
    Ok(links)
}
