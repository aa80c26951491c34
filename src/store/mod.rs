pub mod counting;
pub mod mem;
pub mod redb_store;

use crate::error::StoreError;
use crate::model::ItemKey;
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Raw value of a physical column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum StorageValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Key(ItemKey),
}

impl fmt::Display for StorageValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageValue::Bool(v) => write!(f, "{}", v),
            StorageValue::Int(v) => write!(f, "{}", v),
            StorageValue::Float(v) => write!(f, "{}", v),
            StorageValue::Text(v) => write!(f, "{}", v),
            StorageValue::Key(k) => write!(f, "{}", k),
        }
    }
}

/// Placement of a link table. A monomorphic table is dedicated to exactly one
/// attribute and stores no definition key; a polymorphic table is shared and
/// disambiguates by the attribute-definition key on every link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkSpec {
    pub table: String,
    #[serde(default)]
    pub monomorphic: bool,
}

impl LinkSpec {
    pub fn monomorphic(table: &str) -> Self {
        LinkSpec { table: table.to_string(), monomorphic: true }
    }

    pub fn polymorphic(table: &str) -> Self {
        LinkSpec { table: table.to_string(), monomorphic: false }
    }
}

/// A directed edge between two items, optionally ordered, optionally carrying
/// the attribute-definition key of a polymorphic table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct LinkRecord {
    pub source: ItemKey,
    pub target: ItemKey,
    pub order: Option<i64>,
    pub definition: Option<String>,
}

impl LinkRecord {
    pub fn new(source: ItemKey, target: ItemKey) -> Self {
        LinkRecord { source, target, order: None, definition: None }
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = Some(order);
        self
    }

    pub fn with_definition(mut self, definition: Option<String>) -> Self {
        self.definition = definition;
        self
    }

    /// Deterministic link ordering: ascending order key, ties broken by the
    /// target's item key. Unordered links (`order == None`) sort first and
    /// fall back to the same tie-break.
    pub fn order_cmp(&self, other: &LinkRecord) -> Ordering {
        self.order.cmp(&other.order).then_with(|| self.target.cmp(&other.target))
    }

    fn matches_definition(&self, definition: Option<&str>) -> bool {
        match definition {
            None => true,
            Some(d) => self.definition.as_deref() == Some(d),
        }
    }
}

/// Declarative description of a batch fetch a loader should run before
/// per-item reads, to avoid one round trip per item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PreloadContribution {
    /// Warm the links of `spec` incident to the given items; `reverse` warms
    /// the target-side (inverse navigation) index instead of the source side.
    Links {
        spec: LinkSpec,
        definition: Option<String>,
        reverse: bool,
    },
    /// Warm one named column for the given items.
    Columns { column: String },
}

/// The persistence substrate at its interface boundary: an opaque item/link
/// store. All calls are synchronous and blocking; transactionality across
/// several calls is the substrate's (and the caller's) business.
pub trait ItemStore: Send + Sync {
    /// Raw value of a named column on an item, `None` when unset.
    fn column(&self, item: &ItemKey, column: &str) -> Result<Option<StorageValue>, StoreError>;

    /// Sets or clears a named column. Whether the value lands in a reserved
    /// row column or in flex/side storage is the substrate's decision.
    fn set_column(
        &self,
        item: &ItemKey,
        column: &str,
        value: Option<StorageValue>,
    ) -> Result<(), StoreError>;

    /// Whether `column` is a reserved row column of `type_name` (as opposed
    /// to falling back to flex/side storage).
    fn is_row_column(&self, type_name: &str, column: &str) -> bool;

    /// Creates a link record in the named table.
    fn create_link(&self, spec: &LinkSpec, link: LinkRecord) -> Result<(), StoreError>;

    /// Deletes the exactly matching link record; returns whether one existed.
    fn delete_link(&self, spec: &LinkSpec, link: &LinkRecord) -> Result<bool, StoreError>;

    /// All links of `spec` with the given source, filtered by definition key
    /// when one is given, sorted by [`LinkRecord::order_cmp`].
    fn links_from(
        &self,
        spec: &LinkSpec,
        source: &ItemKey,
        definition: Option<&str>,
    ) -> Result<Vec<LinkRecord>, StoreError>;

    /// All links of `spec` with the given target, filtered by definition key
    /// when one is given, sorted by [`LinkRecord::order_cmp`].
    fn links_to(
        &self,
        spec: &LinkSpec,
        target: &ItemKey,
        definition: Option<&str>,
    ) -> Result<Vec<LinkRecord>, StoreError>;

    /// Index query over a column: all items whose `column` currently holds
    /// `value`. When `definition_column` is given, hits are further filtered
    /// to items whose definition column holds `definition` (both unset also
    /// matches). Results are sorted by item key.
    fn referrers_by_column(
        &self,
        column: &str,
        value: &StorageValue,
        definition_column: Option<&str>,
        definition: Option<&str>,
    ) -> Result<Vec<ItemKey>, StoreError>;

    /// Executes whatever bulk fetch satisfies `contribution` for `items`
    /// before individual reads occur.
    fn preload(
        &self,
        contribution: &PreloadContribution,
        items: &[ItemKey],
    ) -> Result<(), StoreError>;
}
