use crate::error::StorageError;
use crate::model::AttrValue;
use crate::store::ItemStore;

/// Mutation callbacks a live view delegates to. Strategies inject these so
/// the constraint checks and column/link writes live in one place and are
/// shared between `add`/`remove` and the live view.
pub trait LiveOps: Send + Sync {
    /// Current persisted members, in collection order.
    fn snapshot(&self, store: &dyn ItemStore) -> Result<Vec<AttrValue>, StorageError>;

    /// Adds a member, at `index` for ordered collections, at the end (or
    /// nowhere in particular) otherwise. Performs the substrate write
    /// immediately; fails without leaving partial state.
    fn insert(
        &self,
        store: &dyn ItemStore,
        index: Option<usize>,
        value: &AttrValue,
    ) -> Result<(), StorageError>;

    /// Removes a member, enforcing the same constraints as the strategy's
    /// `remove` (membership, mandatory floor).
    fn remove(&self, store: &dyn ItemStore, value: &AttrValue) -> Result<(), StorageError>;
}

/// Mutable view onto persisted collection state. Every operation performs its
/// substrate mutation immediately, unbuffered; a caller needing atomicity
/// across several operations wraps them in a substrate transaction.
pub struct LiveCollection<'a> {
    store: &'a dyn ItemStore,
    ordered: bool,
    ops: Box<dyn LiveOps + 'a>,
}

impl<'a> LiveCollection<'a> {
    pub fn new(store: &'a dyn ItemStore, ordered: bool, ops: Box<dyn LiveOps + 'a>) -> Self {
        LiveCollection { store, ordered, ops }
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Point-in-time copy of the persisted members.
    pub fn snapshot(&self) -> Result<Vec<AttrValue>, StorageError> {
        self.ops.snapshot(self.store)
    }

    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.snapshot()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.snapshot()?.is_empty())
    }

    pub fn contains(&self, value: &AttrValue) -> Result<bool, StorageError> {
        Ok(self.snapshot()?.contains(value))
    }

    /// Appends a member.
    pub fn insert(&self, value: AttrValue) -> Result<(), StorageError> {
        self.ops.insert(self.store, None, &value)
    }

    /// Inserts at a position; only meaningful for ordered collections.
    pub fn insert_at(&self, index: usize, value: AttrValue) -> Result<(), StorageError> {
        if !self.ordered {
            return Err(StorageError::IllegalArgument(
                "positional insert on an unordered collection".to_string(),
            ));
        }
        self.ops.insert(self.store, Some(index), &value)
    }

    pub fn remove(&self, value: &AttrValue) -> Result<(), StorageError> {
        self.ops.remove(self.store, value)
    }

    /// Replaces the member at `index`.
    pub fn set(&self, index: usize, value: AttrValue) -> Result<(), StorageError> {
        let current = self.snapshot()?;
        let old = current.get(index).cloned().ok_or_else(|| {
            StorageError::IllegalArgument(format!("index {} out of bounds", index))
        })?;
        if old == value {
            return Ok(());
        }
        self.ops.remove(self.store, &old)?;
        match self.ops.insert(self.store, Some(index).filter(|_| self.ordered), &value) {
            Ok(()) => Ok(()),
            Err(err) => {
                // Best-effort compensation: put the old member back.
                let _ = self.ops.insert(
                    self.store,
                    Some(index).filter(|_| self.ordered),
                    &old,
                );
                Err(err)
            }
        }
    }

    /// Removes every member, one immediate substrate mutation each. A
    /// mandatory floor fails the removal that would empty the collection and
    /// leaves that member in place.
    pub fn clear(&self) -> Result<(), StorageError> {
        for value in self.snapshot()? {
            self.ops.remove(self.store, &value)?;
        }
        Ok(())
    }
}
