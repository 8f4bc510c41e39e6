//! Two way indices between keys and entry ids.
//!
//! An [`Index`] is a pair of tables. The forward table maps each indexed key
//! to the ids holding it, the reverse table maps each id to its keys. Both
//! halves are written together by every mutation here, but deciding *what*
//! to index is the store's job.

use std::sync::Arc;

use concread::arcache::{ARCache, ARCacheBuilder};

use crate::be::codec::TableCodec;
use crate::be::table::{sql_table_name, Table, TableCursor};
use crate::be::Db;
use crate::cursor::{Cursor, IndexEntry, Tuple};
use crate::entry::EntryId;
use crate::prelude::*;
use crate::rdn::ParentIdAndRdn;

/// An index key of any of the key types the store indexes by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKey {
    Id(EntryId),
    Value(String),
    Rdn(ParentIdAndRdn),
}

impl IndexKey {
    pub fn as_id(&self) -> Option<EntryId> {
        match self {
            IndexKey::Id(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&str> {
        match self {
            IndexKey::Value(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

/// Key types that can travel through a search as an [`IndexKey`].
pub trait IndexKeyed: TableCodec {
    fn into_key(self) -> IndexKey;

    fn from_key(key: &IndexKey) -> Option<Self>;
}

impl IndexKeyed for EntryId {
    fn into_key(self) -> IndexKey {
        IndexKey::Id(self)
    }

    fn from_key(key: &IndexKey) -> Option<Self> {
        key.as_id()
    }
}

impl IndexKeyed for String {
    fn into_key(self) -> IndexKey {
        IndexKey::Value(self)
    }

    fn from_key(key: &IndexKey) -> Option<Self> {
        key.as_value().map(str::to_string)
    }
}

impl IndexKeyed for ParentIdAndRdn {
    fn into_key(self) -> IndexKey {
        IndexKey::Rdn(self)
    }

    fn from_key(key: &IndexKey) -> Option<Self> {
        match key {
            IndexKey::Rdn(r) => Some(r.clone()),
            _ => None,
        }
    }
}

/// Configuration of an index. Consumed by [`IndexBuilder::build`], after
/// which nothing about the index can be changed.
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    name: String,
    cache_size: usize,
    unique: bool,
    single_valued: bool,
}

impl IndexBuilder {
    pub fn new(name: &str) -> Self {
        IndexBuilder {
            name: name.to_string(),
            cache_size: DEFAULT_INDEX_CACHE_SIZE,
            unique: false,
            single_valued: false,
        }
    }

    pub fn cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    /// Each key maps to at most one id.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Each id maps to at most one key.
    pub fn single_valued(mut self) -> Self {
        self.single_valued = true;
        self
    }

    pub fn build<K: TableCodec>(self, db: &Db) -> Result<Index<K>, OperationError> {
        let cache_size = if self.cache_size < MINIMUM_CACHE_SIZE {
            admin_warn!(
                index = ?self.name,
                "index cache size {} too low, setting to {}",
                self.cache_size,
                MINIMUM_CACHE_SIZE
            );
            MINIMUM_CACHE_SIZE
        } else {
            self.cache_size
        };

        let forward = Table::open(db, &sql_table_name("fwd", &self.name), !self.unique)?;
        let reverse = Table::open(db, &sql_table_name("rev", &self.name), !self.single_valued)?;

        let cache = ARCacheBuilder::new()
            .set_size(cache_size, 0)
            .set_reader_quiesce(true)
            .build()
            .ok_or_else(|| {
                admin_error!(index = ?self.name, "failed to build index cache");
                OperationError::BackendEngine
            })?;

        admin_debug!(index = ?self.name, cache_size, "index initialised");
        Ok(Index {
            name: self.name,
            cache_size,
            forward,
            reverse,
            cache,
        })
    }
}

pub struct Index<K: TableCodec> {
    name: String,
    cache_size: usize,
    forward: Table<K, EntryId>,
    reverse: Table<EntryId, K>,
    cache: ARCache<EntryId, Arc<Vec<K>>>,
}

impl<K: TableCodec> std::fmt::Debug for Index<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.name)
            .field("cache_size", &self.cache_size)
            .finish()
    }
}

impl<K: TableCodec> Index<K> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    /// True when one id may hold many keys.
    pub fn is_dups_enabled(&self) -> bool {
        self.reverse.is_dups_enabled()
    }

    fn invalidate(&self, id: EntryId) {
        let mut wr = self.cache.write();
        wr.remove(id);
        wr.commit();
    }

    pub fn add(&self, key: &K, id: EntryId) -> Result<(), OperationError> {
        trace!(index = ?self.name, ?key, %id, "index add");
        self.forward.put(key, &id)?;
        self.reverse.put(&id, key)?;
        self.invalidate(id);
        Ok(())
    }

    /// Remove one (key, id) tuple from both halves.
    pub fn drop_value(&self, key: &K, id: EntryId) -> Result<(), OperationError> {
        trace!(index = ?self.name, ?key, %id, "index drop value");
        self.forward.remove_value(key, &id)?;
        self.reverse.remove_value(&id, key)?;
        self.invalidate(id);
        Ok(())
    }

    /// Remove every tuple for `id`.
    pub fn drop(&self, id: EntryId) -> Result<(), OperationError> {
        trace!(index = ?self.name, %id, "index drop");
        for key in self.reverse.values(&id)? {
            self.forward.remove_value(&key, &id)?;
        }
        self.reverse.remove(&id)?;
        self.invalidate(id);
        Ok(())
    }

    /// The first id holding `key`.
    pub fn forward_lookup(&self, key: &K) -> Result<Option<EntryId>, OperationError> {
        self.forward.get(key)
    }

    /// Every id holding `key`, in id order.
    pub fn forward_values(&self, key: &K) -> Result<Vec<EntryId>, OperationError> {
        self.forward.values(key)
    }

    /// The first key of `id`.
    pub fn reverse_lookup(&self, id: EntryId) -> Result<Option<K>, OperationError> {
        Ok(self.reverse_values(id)?.first().cloned())
    }

    /// Every key of `id`, in key order.
    pub fn reverse_values(&self, id: EntryId) -> Result<Arc<Vec<K>>, OperationError> {
        let mut rd = self.cache.read();
        if let Some(v) = rd.get(&id) {
            return Ok(v.clone());
        }
        let v = Arc::new(self.reverse.values(&id)?);
        rd.insert(id, v.clone());
        Ok(v)
    }

    pub fn forward(&self, key: &K, id: EntryId) -> Result<bool, OperationError> {
        self.forward.has_value(key, &id)
    }

    pub fn reverse(&self, id: EntryId, key: &K) -> Result<bool, OperationError> {
        self.reverse.has_value(&id, key)
    }

    /// Does any id hold `key`.
    pub fn forward_key(&self, key: &K) -> Result<bool, OperationError> {
        self.forward.has(key)
    }

    /// Does `id` hold any key.
    pub fn reverse_key(&self, id: EntryId) -> Result<bool, OperationError> {
        Ok(!self.reverse_values(id)?.is_empty())
    }

    pub fn count(&self) -> Result<usize, OperationError> {
        self.forward.count()
    }

    pub fn count_key(&self, key: &K) -> Result<usize, OperationError> {
        self.forward.count_key(key)
    }

    /// Number of tuples whose key is at or after `key`.
    pub fn greater_than_count(&self, key: &K) -> Result<usize, OperationError> {
        self.forward.greater_than_count(key)
    }

    /// Number of tuples whose key is at or before `key`.
    pub fn less_than_count(&self, key: &K) -> Result<usize, OperationError> {
        self.forward.less_than_count(key)
    }

    pub fn forward_greater_or_eq(&self, key: &K) -> Result<bool, OperationError> {
        self.forward.has_greater_or_equal(key)
    }

    pub fn forward_less_or_eq(&self, key: &K) -> Result<bool, OperationError> {
        self.forward.has_less_or_equal(key)
    }

    /// Does `id` hold a key at or after `key`.
    pub fn reverse_greater_or_eq(&self, id: EntryId, key: &K) -> Result<bool, OperationError> {
        self.reverse.has_value_greater_or_equal(&id, key)
    }

    /// Does `id` hold a key at or before `key`.
    pub fn reverse_less_or_eq(&self, id: EntryId, key: &K) -> Result<bool, OperationError> {
        self.reverse.has_value_less_or_equal(&id, key)
    }

    pub fn forward_cursor(&self) -> IndexCursor<K> {
        IndexCursor::Forward(self.forward.cursor())
    }

    pub fn forward_cursor_key(&self, key: &K) -> IndexCursor<K> {
        IndexCursor::Forward(self.forward.cursor_key(key))
    }

    pub fn reverse_cursor(&self) -> IndexCursor<K> {
        IndexCursor::Reverse(self.reverse.cursor())
    }

    pub fn reverse_cursor_key(&self, id: EntryId) -> IndexCursor<K> {
        IndexCursor::Reverse(self.reverse.cursor_key(&id))
    }

    /// Check that the two halves mirror each other.
    pub fn verify(&self) -> Result<Vec<ConsistencyError>, OperationError> {
        let mut errs = Vec::new();

        let mut fwd = self.forward.cursor();
        while fwd.next()? {
            let t = fwd.get()?;
            if !self.reverse.has_value(&t.value, &t.key)? {
                admin_warn!(index = ?self.name, key = ?t.key, id = %t.value, "forward tuple without reverse");
                errs.push(ConsistencyError::IndexAsymmetric(
                    self.name.clone(),
                    t.value.as_u64(),
                ));
            }
        }

        let mut rev = self.reverse.cursor();
        while rev.next()? {
            let t = rev.get()?;
            if !self.forward.has_value(&t.value, &t.key)? {
                admin_warn!(index = ?self.name, key = ?t.value, id = %t.key, "reverse tuple without forward");
                errs.push(ConsistencyError::IndexAsymmetric(
                    self.name.clone(),
                    t.key.as_u64(),
                ));
            }
        }

        Ok(errs)
    }

    pub fn close(&self) -> Result<(), OperationError> {
        self.forward.close()?;
        self.reverse.close()
    }
}

/// A cursor over either half of an index.
#[derive(Debug)]
pub enum IndexCursor<K> {
    Forward(TableCursor<K, EntryId>),
    Reverse(TableCursor<EntryId, K>),
}

impl<K: TableCodec> IndexCursor<K> {
    /// Position before the first forward tuple with a key at or after `key`.
    pub fn before_key(&mut self, key: &K) -> Result<(), OperationError> {
        match self {
            IndexCursor::Forward(c) => c.before_key(key),
            IndexCursor::Reverse(_) => Err(OperationError::UnsupportedCursorOperation),
        }
    }

    /// Position after the last forward tuple with a key at or before `key`.
    pub fn after_key(&mut self, key: &K) -> Result<(), OperationError> {
        match self {
            IndexCursor::Forward(c) => c.after_key(key),
            IndexCursor::Reverse(_) => Err(OperationError::UnsupportedCursorOperation),
        }
    }
}

impl<K: TableCodec> Cursor for IndexCursor<K> {
    type Item = IndexEntry<K>;

    fn before_first(&mut self) -> Result<(), OperationError> {
        match self {
            IndexCursor::Forward(c) => c.before_first(),
            IndexCursor::Reverse(c) => c.before_first(),
        }
    }

    fn after_last(&mut self) -> Result<(), OperationError> {
        match self {
            IndexCursor::Forward(c) => c.after_last(),
            IndexCursor::Reverse(c) => c.after_last(),
        }
    }

    fn next(&mut self) -> Result<bool, OperationError> {
        match self {
            IndexCursor::Forward(c) => c.next(),
            IndexCursor::Reverse(c) => c.next(),
        }
    }

    fn previous(&mut self) -> Result<bool, OperationError> {
        match self {
            IndexCursor::Forward(c) => c.previous(),
            IndexCursor::Reverse(c) => c.previous(),
        }
    }

    fn available(&self) -> bool {
        match self {
            IndexCursor::Forward(c) => c.available(),
            IndexCursor::Reverse(c) => c.available(),
        }
    }

    fn get(&self) -> Result<IndexEntry<K>, OperationError> {
        match self {
            IndexCursor::Forward(c) => c.get().map(IndexEntry::from_forward_tuple),
            IndexCursor::Reverse(c) => c.get().map(IndexEntry::from_reverse_tuple),
        }
    }

    fn before(&mut self, element: &IndexEntry<K>) -> Result<(), OperationError> {
        match self {
            IndexCursor::Forward(c) => c.before(&Tuple::new(element.key().clone(), element.id())),
            IndexCursor::Reverse(c) => c.before(&Tuple::new(element.id(), element.key().clone())),
        }
    }

    fn after(&mut self, element: &IndexEntry<K>) -> Result<(), OperationError> {
        match self {
            IndexCursor::Forward(c) => c.after(&Tuple::new(element.key().clone(), element.id())),
            IndexCursor::Reverse(c) => c.after(&Tuple::new(element.id(), element.key().clone())),
        }
    }

    fn close(&mut self) -> Result<(), OperationError> {
        match self {
            IndexCursor::Forward(c) => c.close(),
            IndexCursor::Reverse(c) => c.close(),
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            IndexCursor::Forward(c) => c.is_closed(),
            IndexCursor::Reverse(c) => c.is_closed(),
        }
    }
}

/// Presents an index cursor of any key type as a cursor of [`IndexKey`]
/// entries, so cursors over different indices can be combined.
#[derive(Debug)]
pub struct ErasedIndexCursor<K> {
    inner: IndexCursor<K>,
}

impl<K: IndexKeyed> ErasedIndexCursor<K> {
    pub fn new(inner: IndexCursor<K>) -> Self {
        ErasedIndexCursor { inner }
    }

    fn convert(element: &IndexEntry<IndexKey>) -> Result<IndexEntry<K>, OperationError> {
        let key = K::from_key(element.key()).ok_or(OperationError::UnsupportedCursorOperation)?;
        let mut out = IndexEntry::forward(key, element.id());
        if let Some(e) = element.entry() {
            out.set_entry(e.clone());
        }
        Ok(out)
    }
}

impl<K: IndexKeyed> Cursor for ErasedIndexCursor<K> {
    type Item = IndexEntry<IndexKey>;

    fn before_first(&mut self) -> Result<(), OperationError> {
        self.inner.before_first()
    }

    fn after_last(&mut self) -> Result<(), OperationError> {
        self.inner.after_last()
    }

    fn next(&mut self) -> Result<bool, OperationError> {
        self.inner.next()
    }

    fn previous(&mut self) -> Result<bool, OperationError> {
        self.inner.previous()
    }

    fn available(&self) -> bool {
        self.inner.available()
    }

    fn get(&self) -> Result<Self::Item, OperationError> {
        self.inner.get().map(|e| e.map_key(K::into_key))
    }

    fn before(&mut self, element: &Self::Item) -> Result<(), OperationError> {
        let e = Self::convert(element)?;
        self.inner.before(&e)
    }

    fn after(&mut self, element: &Self::Item) -> Result<(), OperationError> {
        let e = Self::convert(element)?;
        self.inner.after(&e)
    }

    fn close(&mut self) -> Result<(), OperationError> {
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
