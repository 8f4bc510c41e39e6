//! Bidirectional cursors.
//!
//! Every cursor is in one of three positions: before the first element, on an
//! element ([`Cursor::available`] is true), or after the last element. A
//! fresh cursor is before the first element. Cursors compose by wrapping, and
//! a cursor owns and closes whatever it wraps.
//!
//! Cursors hold no locks between calls and are advanced by one thread at a
//! time.

use std::sync::Arc;

use crate::be::dbentry::DbEntry;
use crate::be::index::IndexKey;
use crate::be::table::TableCursor;
use crate::entry::{Entry, EntryId};
use crate::prelude::*;

pub trait Cursor: Send {
    type Item;

    fn before_first(&mut self) -> Result<(), OperationError>;

    fn after_last(&mut self) -> Result<(), OperationError>;

    fn first(&mut self) -> Result<bool, OperationError> {
        self.before_first()?;
        self.next()
    }

    fn last(&mut self) -> Result<bool, OperationError> {
        self.after_last()?;
        self.previous()
    }

    fn next(&mut self) -> Result<bool, OperationError>;

    fn previous(&mut self) -> Result<bool, OperationError>;

    fn available(&self) -> bool;

    /// The element the cursor is positioned on.
    fn get(&self) -> Result<Self::Item, OperationError>;

    /// Position just before `element`, so that `next` lands on it or on the
    /// first element after it.
    fn before(&mut self, _element: &Self::Item) -> Result<(), OperationError> {
        Err(OperationError::UnsupportedCursorOperation)
    }

    /// Position just after `element`, so that `previous` lands on it or on
    /// the last element before it.
    fn after(&mut self, _element: &Self::Item) -> Result<(), OperationError> {
        Err(OperationError::UnsupportedCursorOperation)
    }

    fn close(&mut self) -> Result<(), OperationError>;

    fn is_closed(&self) -> bool;
}

impl<C: Cursor + ?Sized> Cursor for Box<C> {
    type Item = C::Item;

    fn before_first(&mut self) -> Result<(), OperationError> {
        (**self).before_first()
    }

    fn after_last(&mut self) -> Result<(), OperationError> {
        (**self).after_last()
    }

    fn first(&mut self) -> Result<bool, OperationError> {
        (**self).first()
    }

    fn last(&mut self) -> Result<bool, OperationError> {
        (**self).last()
    }

    fn next(&mut self) -> Result<bool, OperationError> {
        (**self).next()
    }

    fn previous(&mut self) -> Result<bool, OperationError> {
        (**self).previous()
    }

    fn available(&self) -> bool {
        (**self).available()
    }

    fn get(&self) -> Result<Self::Item, OperationError> {
        (**self).get()
    }

    fn before(&mut self, element: &Self::Item) -> Result<(), OperationError> {
        (**self).before(element)
    }

    fn after(&mut self, element: &Self::Item) -> Result<(), OperationError> {
        (**self).after(element)
    }

    fn close(&mut self) -> Result<(), OperationError> {
        (**self).close()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }
}

pub(crate) fn check_open(closed: bool) -> Result<(), OperationError> {
    if closed {
        admin_debug!("operation on a closed cursor");
        Err(OperationError::InvalidCursorState)
    } else {
        Ok(())
    }
}

/// A key and value pair from a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> Tuple<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Tuple { key, value }
    }
}

/// Which half of an index an [`IndexEntry`] was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// value -> id
    Forward,
    /// id -> value
    Reverse,
}

/// A cursor position over an index: an indexed key, the entry id it maps
/// to, and the entry itself once something has had to load it.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry<K> {
    key: K,
    id: EntryId,
    entry: Option<Arc<Entry>>,
    orientation: Orientation,
}

impl<K> IndexEntry<K> {
    pub fn forward(key: K, id: EntryId) -> Self {
        IndexEntry {
            key,
            id,
            entry: None,
            orientation: Orientation::Forward,
        }
    }

    pub fn reverse(id: EntryId, key: K) -> Self {
        IndexEntry {
            key,
            id,
            entry: None,
            orientation: Orientation::Reverse,
        }
    }

    pub fn from_forward_tuple(t: Tuple<K, EntryId>) -> Self {
        IndexEntry::forward(t.key, t.value)
    }

    pub fn from_reverse_tuple(t: Tuple<EntryId, K>) -> Self {
        IndexEntry::reverse(t.key, t.value)
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn entry(&self) -> Option<&Arc<Entry>> {
        self.entry.as_ref()
    }

    pub fn set_entry(&mut self, entry: Arc<Entry>) {
        self.entry = Some(entry);
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn map_key<J, F: FnOnce(K) -> J>(self, f: F) -> IndexEntry<J> {
        IndexEntry {
            key: f(self.key),
            id: self.id,
            entry: self.entry,
            orientation: self.orientation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    BeforeFirst,
    On,
    AfterLast,
}

/// A cursor over nothing.
#[derive(Debug)]
pub struct EmptyCursor<T> {
    closed: bool,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> Default for EmptyCursor<T> {
    fn default() -> Self {
        EmptyCursor {
            closed: false,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> EmptyCursor<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T> Cursor for EmptyCursor<T> {
    type Item = T;

    fn before_first(&mut self) -> Result<(), OperationError> {
        check_open(self.closed)
    }

    fn after_last(&mut self) -> Result<(), OperationError> {
        check_open(self.closed)
    }

    fn next(&mut self) -> Result<bool, OperationError> {
        check_open(self.closed)?;
        Ok(false)
    }

    fn previous(&mut self) -> Result<bool, OperationError> {
        check_open(self.closed)?;
        Ok(false)
    }

    fn available(&self) -> bool {
        false
    }

    fn get(&self) -> Result<T, OperationError> {
        Err(OperationError::InvalidCursorState)
    }

    fn before(&mut self, _element: &T) -> Result<(), OperationError> {
        check_open(self.closed)
    }

    fn after(&mut self, _element: &T) -> Result<(), OperationError> {
        check_open(self.closed)
    }

    fn close(&mut self) -> Result<(), OperationError> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// A cursor over exactly one element.
#[derive(Debug)]
pub struct SingletonCursor<T> {
    value: T,
    pos: Position,
    closed: bool,
}

impl<T> SingletonCursor<T> {
    pub fn new(value: T) -> Self {
        SingletonCursor {
            value,
            pos: Position::BeforeFirst,
            closed: false,
        }
    }
}

impl<T: Clone + Send> Cursor for SingletonCursor<T> {
    type Item = T;

    fn before_first(&mut self) -> Result<(), OperationError> {
        check_open(self.closed)?;
        self.pos = Position::BeforeFirst;
        Ok(())
    }

    fn after_last(&mut self) -> Result<(), OperationError> {
        check_open(self.closed)?;
        self.pos = Position::AfterLast;
        Ok(())
    }

    fn next(&mut self) -> Result<bool, OperationError> {
        check_open(self.closed)?;
        self.pos = match self.pos {
            Position::BeforeFirst => Position::On,
            Position::On | Position::AfterLast => Position::AfterLast,
        };
        Ok(self.pos == Position::On)
    }

    fn previous(&mut self) -> Result<bool, OperationError> {
        check_open(self.closed)?;
        self.pos = match self.pos {
            Position::AfterLast => Position::On,
            Position::On | Position::BeforeFirst => Position::BeforeFirst,
        };
        Ok(self.pos == Position::On)
    }

    fn available(&self) -> bool {
        !self.closed && self.pos == Position::On
    }

    fn get(&self) -> Result<T, OperationError> {
        check_open(self.closed)?;
        if self.pos == Position::On {
            Ok(self.value.clone())
        } else {
            Err(OperationError::InvalidCursorState)
        }
    }

    fn close(&mut self) -> Result<(), OperationError> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Presents a fixed key and an in memory set of values as a cursor of
/// tuples for that key, in value order.
#[derive(Debug)]
pub struct KeyTupleArrayCursor<K, V> {
    key: K,
    values: Vec<V>,
    // -1 is before first, values.len() is after last.
    pos: isize,
    closed: bool,
}

impl<K, V: Ord> KeyTupleArrayCursor<K, V> {
    pub fn new(key: K, mut values: Vec<V>) -> Self {
        values.sort();
        values.dedup();
        KeyTupleArrayCursor {
            key,
            values,
            pos: -1,
            closed: false,
        }
    }

    fn len(&self) -> isize {
        self.values.len() as isize
    }
}

impl<K, V> Cursor for KeyTupleArrayCursor<K, V>
where
    K: Clone + PartialEq + Send,
    V: Clone + Ord + Send,
{
    type Item = Tuple<K, V>;

    fn before_first(&mut self) -> Result<(), OperationError> {
        check_open(self.closed)?;
        self.pos = -1;
        Ok(())
    }

    fn after_last(&mut self) -> Result<(), OperationError> {
        check_open(self.closed)?;
        self.pos = self.len();
        Ok(())
    }

    fn next(&mut self) -> Result<bool, OperationError> {
        check_open(self.closed)?;
        if self.pos < self.len() {
            self.pos += 1;
        }
        Ok(self.available())
    }

    fn previous(&mut self) -> Result<bool, OperationError> {
        check_open(self.closed)?;
        if self.pos >= 0 {
            self.pos -= 1;
        }
        Ok(self.available())
    }

    fn available(&self) -> bool {
        !self.closed && self.pos >= 0 && self.pos < self.len()
    }

    fn get(&self) -> Result<Self::Item, OperationError> {
        check_open(self.closed)?;
        if !self.available() {
            return Err(OperationError::InvalidCursorState);
        }
        usize::try_from(self.pos)
            .ok()
            .and_then(|i| self.values.get(i))
            .map(|v| Tuple::new(self.key.clone(), v.clone()))
            .ok_or(OperationError::InvalidCursorState)
    }

    fn before(&mut self, element: &Self::Item) -> Result<(), OperationError> {
        check_open(self.closed)?;
        if element.key != self.key {
            return Err(OperationError::UnsupportedCursorOperation);
        }
        // Index of the first value >= element, then step one back.
        let idx = self.values.partition_point(|v| v < &element.value);
        self.pos = idx as isize - 1;
        Ok(())
    }

    fn after(&mut self, element: &Self::Item) -> Result<(), OperationError> {
        check_open(self.closed)?;
        if element.key != self.key {
            return Err(OperationError::UnsupportedCursorOperation);
        }
        // Index of the first value > element.
        let idx = self.values.partition_point(|v| v <= &element.value);
        self.pos = idx as isize;
        Ok(())
    }

    fn close(&mut self) -> Result<(), OperationError> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Every entry of the store in id order, as candidates keyed by their own
/// id. Entries are not loaded.
#[derive(Debug)]
pub struct AllEntriesCursor {
    inner: TableCursor<EntryId, DbEntry>,
}

impl AllEntriesCursor {
    pub fn new(inner: TableCursor<EntryId, DbEntry>) -> Self {
        AllEntriesCursor { inner }
    }
}

impl Cursor for AllEntriesCursor {
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
        let id = self.inner.get_key()?;
        Ok(IndexEntry::forward(IndexKey::Id(id), id))
    }

    fn before(&mut self, element: &Self::Item) -> Result<(), OperationError> {
        self.inner.before_key(&element.id())
    }

    fn after(&mut self, element: &Self::Item) -> Result<(), OperationError> {
        self.inner.after_key(&element.id())
    }

    fn close(&mut self) -> Result<(), OperationError> {
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Drains a cursor forward from its current position as an iterator.
/// Iteration stops after the first error.
pub struct CursorIter<'a, T> {
    cursor: &'a mut (dyn Cursor<Item = T> + 'a),
    done: bool,
}

impl<'a, T> CursorIter<'a, T> {
    pub fn new(cursor: &'a mut (dyn Cursor<Item = T> + 'a)) -> Self {
        CursorIter {
            cursor,
            done: false,
        }
    }
}

impl<T> Iterator for CursorIter<'_, T> {
    type Item = Result<T, OperationError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.cursor.next() {
            Ok(true) => Some(self.cursor.get()),
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
