pub mod column;
pub mod derived;
pub mod foreign_key;
pub mod inline_ref;
pub mod link_list;
pub mod link_set;
pub mod link_single;
pub mod reverse_key;
pub mod reverse_nav;

use crate::error::{StorageError, Violation};
use crate::live::LiveCollection;
use crate::model::{AttrValue, AttributeDescriptor, ItemKey};
use crate::store::{ItemStore, LinkSpec, PreloadContribution};
use crate::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// The polymorphic contract every persistence strategy implements. One
/// instance per attribute, constructed at model-load time, stateless with
/// respect to individual items. Callers dispatch through this trait only and
/// never branch on the concrete strategy type.
pub trait StorageStrategy: Send + Sync {
    fn descriptor(&self) -> &AttributeDescriptor;

    /// Reads the persisted (or computed) value. Never mutates state. For
    /// live-capable strategies this is a snapshot, not the live view.
    fn read(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<AttrValue, StorageError>;

    /// Checks a candidate value without touching persisted state. Raises a
    /// `Violation` for business-rule conflicts and `IllegalArgument` for
    /// fundamentally incompatible shapes.
    fn validate(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        candidate: &AttrValue,
    ) -> Result<(), StorageError>;

    /// Full replace. Computes the delta against persisted state and applies
    /// only the delta.
    fn write(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: AttrValue,
    ) -> Result<(), StorageError>;

    /// Incrementally adds one element to a collection-valued attribute.
    fn add(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: AttrValue,
    ) -> Result<(), StorageError>;

    /// Incrementally removes one element from a collection-valued attribute.
    fn remove(
        &self,
        store: &dyn ItemStore,
        item: &ItemKey,
        value: &AttrValue,
    ) -> Result<(), StorageError>;

    /// Whether [`StorageStrategy::live_view`] returns a view.
    fn supports_live_view(&self) -> bool {
        false
    }

    fn live_view<'a>(
        &'a self,
        _store: &'a dyn ItemStore,
        _item: &ItemKey,
    ) -> Result<Option<LiveCollection<'a>>, StorageError> {
        Ok(None)
    }

    /// Read-only strategies reject every mutation with a clean violation;
    /// callers use this flag to not even attempt one.
    fn is_derived(&self) -> bool {
        false
    }

    /// Renumbers persisted order keys by full-list position. Only ordered
    /// strategies support an explicit reorder.
    fn resort(&self, _store: &dyn ItemStore, _item: &ItemKey) -> Result<(), StorageError> {
        Err(StorageError::IllegalArgument(format!(
            "attribute {} is not ordered",
            self.descriptor().name
        )))
    }

    /// The link table this strategy persists into, when link-table-based.
    /// Consumed by reverse-navigation binding.
    fn link_spec(&self) -> Option<&LinkSpec> {
        None
    }

    /// Reverse navigation: all items whose value of this attribute contains
    /// `target`. Empty where the strategy cannot answer it.
    fn referrers(
        &self,
        _store: &dyn ItemStore,
        _target: &ItemKey,
    ) -> Result<Vec<ItemKey>, StorageError> {
        Ok(Vec::new())
    }

    /// How a batch loader should warm this attribute for a set of items.
    fn preload_contribution(&self) -> Option<PreloadContribution> {
        None
    }

    /// How a batch loader should warm the inverse navigation.
    fn reverse_preload_contribution(&self) -> Option<PreloadContribution> {
        None
    }
}

fn default_separator() -> char {
    ','
}

/// Per-attribute storage configuration, chosen at model-definition time.
/// Selects one concrete strategy and its placement parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    /// One primitive value in one physical column.
    Column { column: String },
    /// A collection of primitives as a JSON array in one column.
    JsonColumn { column: String },
    /// Legacy string collection joined by a separator character.
    SeparatedColumn {
        column: String,
        #[serde(default = "default_separator")]
        separator: char,
    },
    /// To-one reference as a foreign-key column on the owner.
    ForeignKey { column: String },
    /// To-one reference as a foreign-key column on the target, enforcing
    /// single-owner exclusivity.
    ReverseForeignKey { column: String },
    /// Unordered to-many references as link records.
    LinkSet {
        table: String,
        #[serde(default)]
        monomorphic: bool,
    },
    /// Ordered to-many references as link records with order keys.
    LinkList {
        table: String,
        #[serde(default)]
        monomorphic: bool,
    },
    /// To-one reference stored with link-table mechanics.
    LinkSingle {
        table: String,
        #[serde(default)]
        monomorphic: bool,
    },
    /// Unordered collection via a back-reference column on the members.
    InlineSet {
        container_column: String,
        definition_column: Option<String>,
    },
    /// Ordered collection via back-reference plus order column on the members.
    InlineList {
        container_column: String,
        definition_column: Option<String>,
        order_column: String,
    },
    /// Read-only value computed by a named algorithm.
    Derived { algorithm: String },
    /// Forwards every operation to another attribute's strategy.
    Delegating { target: String },
    /// Reads the explicit attribute, falling back to a default-supplying one.
    Fallback { primary: String, default: String },
    /// Inverse of another attribute's link direction, no state of its own.
    ReverseNavigation { opposite: String },
}

/// A pluggable computation backing a derived attribute. Selected by name from
/// an [`AlgorithmTable`]; replaces resolve-a-method-by-name reflection.
pub trait DerivedAlgorithm: Send + Sync {
    fn compute(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<AttrValue, StorageError>;
}

/// Explicitly constructed table of named derived algorithms, passed to
/// [`bind`]. Not a global registry.
#[derive(Default)]
pub struct AlgorithmTable {
    algorithms: HashMap<String, Arc<dyn DerivedAlgorithm>>,
}

impl AlgorithmTable {
    pub fn new() -> Self {
        AlgorithmTable::default()
    }

    pub fn register(&mut self, name: &str, algorithm: Arc<dyn DerivedAlgorithm>) {
        self.algorithms.insert(name.to_string(), algorithm);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DerivedAlgorithm>> {
        self.algorithms.get(name).cloned()
    }
}

/// Constructed-once mapping from attribute id to its bound strategy.
pub struct StrategyTable {
    strategies: HashMap<String, Arc<dyn StorageStrategy>>,
}

impl StrategyTable {
    pub fn strategy(&self, attr_id: &str) -> Option<&Arc<dyn StorageStrategy>> {
        self.strategies.get(attr_id)
    }

    pub fn resolve(&self, attr_id: &str) -> Result<&Arc<dyn StorageStrategy>, StorageError> {
        self.strategy(attr_id).ok_or_else(|| {
            StorageError::IllegalArgument(format!("no strategy bound for attribute {}", attr_id))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn StorageStrategy>)> {
        self.strategies.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl fmt::Debug for StrategyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut attributes: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        attributes.sort_unstable();
        f.debug_struct("StrategyTable").field("attributes", &attributes).finish()
    }
}

/// Binds every attribute of a model to its configured strategy. Two passes:
/// self-contained strategies first, then the ones that resolve a peer
/// (delegating, fallback, reverse navigation). A peer must be bound in the
/// first pass; chains of deferred strategies are rejected.
pub fn bind(
    model: &[(AttributeDescriptor, StorageConfig)],
    algorithms: &AlgorithmTable,
) -> Result<StrategyTable, StorageError> {
    let mut strategies: HashMap<String, Arc<dyn StorageStrategy>> = HashMap::new();
    let mut deferred: Vec<&(AttributeDescriptor, StorageConfig)> = Vec::new();

    for entry in model {
        let (descr, config) = entry;
        let strategy: Arc<dyn StorageStrategy> = match config {
            StorageConfig::Column { column } => {
                Arc::new(column::ColumnStorage::new(descr.clone(), column))
            }
            StorageConfig::JsonColumn { column } => {
                Arc::new(column::JsonColumnStorage::new(descr.clone(), column))
            }
            StorageConfig::SeparatedColumn { column, separator } => {
                Arc::new(column::SeparatedColumnStorage::new(descr.clone(), column, *separator))
            }
            StorageConfig::ForeignKey { column } => {
                Arc::new(foreign_key::ForeignKeyStorage::new(descr.clone(), column))
            }
            StorageConfig::ReverseForeignKey { column } => {
                Arc::new(reverse_key::ReverseForeignKeyStorage::new(descr.clone(), column))
            }
            StorageConfig::LinkSet { table, monomorphic } => Arc::new(
                link_set::LinkSetStorage::new(descr.clone(), link_spec(table, *monomorphic)),
            ),
            StorageConfig::LinkList { table, monomorphic } => Arc::new(
                link_list::LinkListStorage::new(descr.clone(), link_spec(table, *monomorphic)),
            ),
            StorageConfig::LinkSingle { table, monomorphic } => Arc::new(
                link_single::LinkSingleStorage::new(descr.clone(), link_spec(table, *monomorphic)),
            ),
            StorageConfig::InlineSet { container_column, definition_column } => {
                Arc::new(inline_ref::InlineSetStorage::new(
                    descr.clone(),
                    container_column,
                    definition_column.as_deref(),
                ))
            }
            StorageConfig::InlineList { container_column, definition_column, order_column } => {
                Arc::new(inline_ref::InlineListStorage::new(
                    descr.clone(),
                    container_column,
                    definition_column.as_deref(),
                    order_column,
                ))
            }
            StorageConfig::Derived { algorithm } => {
                let algo = algorithms.get(algorithm).ok_or_else(|| {
                    StorageError::IllegalArgument(format!(
                        "unknown algorithm {} for derived attribute {}",
                        algorithm, descr.id
                    ))
                })?;
                Arc::new(derived::DerivedStorage::new(descr.clone(), algorithm, algo))
            }
            StorageConfig::Delegating { .. }
            | StorageConfig::Fallback { .. }
            | StorageConfig::ReverseNavigation { .. } => {
                deferred.push(entry);
                continue;
            }
        };
        strategies.insert(descr.id.clone(), strategy);
    }

    for (descr, config) in deferred {
        let strategy: Arc<dyn StorageStrategy> = match config {
            StorageConfig::Delegating { target } => Arc::new(derived::DelegatingStorage::new(
                descr.clone(),
                peer(&strategies, &descr.id, target)?,
            )),
            StorageConfig::Fallback { primary, default } => Arc::new(derived::FallbackStorage::new(
                descr.clone(),
                peer(&strategies, &descr.id, primary)?,
                peer(&strategies, &descr.id, default)?,
            )),
            StorageConfig::ReverseNavigation { opposite } => {
                let opposite_strategy = peer(&strategies, &descr.id, opposite)?;
                Arc::new(reverse_nav::ReverseNavigationStorage::new(
                    descr.clone(),
                    &opposite_strategy,
                ))
            }
            _ => unreachable!("only peer-resolving configs are deferred"),
        };
        strategies.insert(descr.id.clone(), strategy);
    }

    info!("bound {} attribute storage strategies", strategies.len());
    Ok(StrategyTable { strategies })
}

fn link_spec(table: &str, monomorphic: bool) -> LinkSpec {
    LinkSpec { table: table.to_string(), monomorphic }
}

fn peer(
    strategies: &HashMap<String, Arc<dyn StorageStrategy>>,
    attr: &str,
    peer_id: &str,
) -> Result<Arc<dyn StorageStrategy>, StorageError> {
    strategies.get(peer_id).cloned().ok_or_else(|| {
        StorageError::IllegalArgument(format!(
            "attribute {} refers to unbound attribute {}",
            attr, peer_id
        ))
    })
}

// ---- shared strategy helpers ----

/// Error for add/remove on a single-valued strategy.
pub(crate) fn not_a_collection(attr: &AttributeDescriptor) -> StorageError {
    StorageError::IllegalArgument(format!(
        "attribute {} is single-valued, use write instead of add/remove",
        attr.name
    ))
}

/// Elements of a candidate collection value; `Null` is the empty collection.
pub(crate) fn expect_collection<'v>(
    attr: &AttributeDescriptor,
    value: &'v AttrValue,
) -> Result<&'v [AttrValue], StorageError> {
    value.elements().ok_or_else(|| {
        StorageError::IllegalArgument(format!(
            "attribute {} requires a collection value, got {}",
            attr.name, value
        ))
    })
}

/// Item key of a candidate reference element, checked against the declared
/// target type.
pub(crate) fn expect_ref<'v>(
    attr: &AttributeDescriptor,
    value: &'v AttrValue,
) -> Result<&'v ItemKey, StorageError> {
    let key = value.as_item().ok_or_else(|| {
        StorageError::IllegalArgument(format!(
            "attribute {} requires an item reference, got {}",
            attr.name, value
        ))
    })?;
    match attr.target_type() {
        Some(expected) if key.type_name != expected => Err(StorageError::IllegalArgument(
            format!("attribute {} expects items of type {}, got {}", attr.name, expected, key),
        )),
        _ => Ok(key),
    }
}

/// Rejects duplicates in a candidate collection of a non-bag attribute.
pub(crate) fn check_set_uniqueness(
    attr: &AttributeDescriptor,
    elements: &[AttrValue],
) -> Result<(), StorageError> {
    if attr.bag {
        return Ok(());
    }
    for (i, value) in elements.iter().enumerate() {
        if elements[..i].contains(value) {
            return Err(Violation::Duplicate {
                attr: attr.name.clone(),
                value: value.to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// Mandatory floor: an incremental remove must not empty the collection.
pub(crate) fn check_mandatory_floor(
    attr: &AttributeDescriptor,
    current_len: usize,
) -> Result<(), StorageError> {
    if attr.mandatory && current_len <= 1 {
        return Err(Violation::MandatoryEmpty { attr: attr.name.clone() }.into());
    }
    Ok(())
}
