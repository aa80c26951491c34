//! attrbit maps declared attributes of a dynamically typed object model onto
//! physical storage: columns, foreign keys and link records over an item/link
//! store. Each attribute is bound to one interchangeable [`StorageStrategy`]
//! chosen by configuration, so how a value is persisted is invisible to
//! callers reading and writing through the strategy table.
//!
//! Substrates are pluggable behind the [`ItemStore`] trait; an in-memory store
//! and a [Redb](https://github.com/cberner/redb)-backed store (bincode-encoded
//! keys and values) ship in the crate.

pub mod error;
pub mod live;
pub mod logger;
pub mod mapping;
pub mod model;
pub mod store;
pub mod strategy;

pub use chrono;
pub use error::{StorageError, StoreError, Violation};
pub use live::{LiveCollection, LiveOps};
pub use mapping::{DirectMapping, ValueMapping};
pub use model::{AttrValue, AttributeDescriptor, ItemKey, Multiplicity, ValueType};
pub use once_cell;
pub use redb;
pub use serde;
pub use serde_json;
pub use store::counting::{CountingStore, OpCounters};
pub use store::mem::MemStore;
pub use store::redb_store::RedbStore;
pub use store::{ItemStore, LinkRecord, LinkSpec, PreloadContribution, StorageValue};
pub use strategy::{
    bind, AlgorithmTable, DerivedAlgorithm, StorageConfig, StorageStrategy, StrategyTable,
};
