use xdbm_partition::be::index::{ErasedIndexCursor, IndexCursor};

use super::{check_open, delegate_cursor, Candidate, CandidateCursor, ScanCursor};
use crate::evaluator::{
    EqualityEvaluator, OrderingEvaluator, PresenceEvaluator, SubstringEvaluator,
};
use crate::prelude::*;

/// Entries holding a value equal to the assertion. Approximate matches use
/// this too.
pub struct EqualityCursor<'a> {
    inner: CandidateCursor<'a>,
}

impl<'a> EqualityCursor<'a> {
    pub fn new(store: &'a Store, evaluator: EqualityEvaluator<'a>) -> Self {
        let inner: CandidateCursor<'a> = match evaluator.index() {
            Some(idx) => Box::new(ErasedIndexCursor::new(
                idx.forward_cursor_key(evaluator.value()),
            )),
            None => Box::new(ScanCursor::new(store, Box::new(evaluator))),
        };
        EqualityCursor { inner }
    }
}

delegate_cursor!(EqualityCursor);

/// Entries holding any value of an attribute.
pub struct PresenceCursor<'a> {
    inner: CandidateCursor<'a>,
}

impl<'a> PresenceCursor<'a> {
    pub fn new(store: &'a Store, evaluator: PresenceEvaluator<'a>) -> Self {
        let inner: CandidateCursor<'a> = match evaluator.presence_key() {
            Some(oid) => Box::new(ErasedIndexCursor::new(
                store.presence_index().forward_cursor_key(oid),
            )),
            // Also covers objectClass, which the evaluator accepts without
            // looking at the entry.
            None => Box::new(ScanCursor::new(store, Box::new(evaluator))),
        };
        PresenceCursor { inner }
    }
}

delegate_cursor!(PresenceCursor);

/// Entries holding a value at or after (or at or before) the assertion.
pub struct OrderingCursor<'a> {
    inner: CandidateCursor<'a>,
}

impl<'a> OrderingCursor<'a> {
    pub fn new(store: &'a Store, evaluator: OrderingEvaluator<'a>) -> Self {
        let inner: CandidateCursor<'a> = match evaluator.index() {
            Some(idx) => {
                let (lower, upper) = match (evaluator.is_byte_ordered(), evaluator.is_greater()) {
                    (true, true) => (Some(evaluator.value().clone()), Upper::Unbounded),
                    (true, false) => (None, Upper::Inclusive(evaluator.value().clone())),
                    // Key order says nothing about value order, walk it all.
                    (false, _) => (None, Upper::Unbounded),
                };
                Box::new(IndexWalk::new(
                    idx,
                    lower,
                    upper,
                    move |k: &str| evaluator.key_matches(k),
                ))
            }
            None => Box::new(ScanCursor::new(store, Box::new(evaluator))),
        };
        OrderingCursor { inner }
    }
}

delegate_cursor!(OrderingCursor);

/// Entries holding a value that matches a substring assertion.
///
/// With an index this walks the forward half of it in key order, narrowed
/// to the initial piece when there is one, and yields an id only at its
/// first matching key (see `IndexWalk::first_for_id`), which costs one
/// lookup of that id's keys in the reverse half. Without an index it scans
/// every entry.
pub struct SubstringCursor<'a> {
    inner: CandidateCursor<'a>,
}

impl<'a> SubstringCursor<'a> {
    pub fn new(store: &'a Store, evaluator: SubstringEvaluator<'a>) -> Self {
        let inner: CandidateCursor<'a> = match evaluator.index() {
            Some(idx) => {
                // With an initial piece only keys starting with it can match.
                let (lower, upper) = match (&evaluator.matcher().initial, evaluator.is_byte_ordered()) {
                    (Some(initial), true) if !initial.is_empty() => {
                        (Some(initial.clone()), Upper::Prefix(initial.clone()))
                    }
                    _ => (None, Upper::Unbounded),
                };
                Box::new(IndexWalk::new(
                    idx,
                    lower,
                    upper,
                    move |k: &str| evaluator.key_matches(k),
                ))
            }
            None => Box::new(ScanCursor::new(store, Box::new(evaluator))),
        };
        SubstringCursor { inner }
    }
}

delegate_cursor!(SubstringCursor);

/// Where a forward walk of an index stops.
#[derive(Debug, Clone)]
enum Upper {
    Unbounded,
    /// Stop after the last key at or before this one.
    Inclusive(String),
    /// Stop after the last key starting with this one.
    Prefix(String),
}

/// Walks the forward half of a value index between bounds, yielding the ids
/// of keys that `matches` accepts.
///
/// An id holding several matching keys appears under each of them in the
/// index, but is yielded only at the first of them in key order, in both
/// directions. Keys outside the bounds are never yielded.
struct IndexWalk<'a, M> {
    index: &'a Index<String>,
    inner: IndexCursor<String>,
    lower: Option<String>,
    upper: Upper,
    matches: M,
    current: Option<Candidate>,
}

impl<'a, M> IndexWalk<'a, M>
where
    M: Fn(&str) -> bool + Send,
{
    fn new(index: &'a Index<String>, lower: Option<String>, upper: Upper, matches: M) -> Self {
        filter_trace!(index = %index.name(), ?lower, ?upper, "walking index");
        IndexWalk {
            index,
            inner: index.forward_cursor(),
            lower,
            upper,
            matches,
            current: None,
        }
    }

    fn below_lower(&self, key: &str) -> bool {
        self.lower.as_deref().map(|l| key < l).unwrap_or(false)
    }

    fn beyond_upper(&self, key: &str) -> bool {
        match &self.upper {
            Upper::Unbounded => false,
            Upper::Inclusive(u) => key > u.as_str(),
            Upper::Prefix(p) => key > p.as_str() && !key.starts_with(p.as_str()),
        }
    }

    fn accepts(&self, key: &str) -> bool {
        !self.below_lower(key) && !self.beyond_upper(key) && (self.matches)(key)
    }

    /// Is `key` the first key of `id` the walk accepts.
    fn first_for_id(&self, id: EntryId, key: &str) -> Result<bool, OperationError> {
        let keys = self.index.reverse_values(id)?;
        Ok(!keys
            .iter()
            .take_while(|k| k.as_str() < key)
            .any(|k| self.accepts(k)))
    }

    fn advance(&mut self, forward: bool) -> Result<bool, OperationError> {
        self.current = None;
        loop {
            let more = if forward {
                self.inner.next()?
            } else {
                self.inner.previous()?
            };
            if !more {
                return Ok(false);
            }
            let t = self.inner.get()?;
            let key = t.key().as_str();
            // Outside the bounds: skip toward them, or stop moving away.
            let (skip, stop) = if forward {
                (self.below_lower(key), self.beyond_upper(key))
            } else {
                (self.beyond_upper(key), self.below_lower(key))
            };
            if skip {
                continue;
            }
            if stop {
                return Ok(false);
            }
            if (self.matches)(key) && self.first_for_id(t.id(), key)? {
                self.current = Some(t.map_key(IndexKey::Value));
                return Ok(true);
            }
        }
    }

    fn position(&mut self, element: &Candidate) -> Result<IndexEntry<String>, OperationError> {
        self.current = None;
        match element.key() {
            IndexKey::Value(v) => Ok(IndexEntry::forward(v.clone(), element.id())),
            _ => Err(OperationError::UnsupportedCursorOperation),
        }
    }
}

impl<M> Cursor for IndexWalk<'_, M>
where
    M: Fn(&str) -> bool + Send,
{
    type Item = Candidate;

    fn before_first(&mut self) -> Result<(), OperationError> {
        self.current = None;
        match self.lower.clone() {
            Some(l) => self.inner.before_key(&l),
            None => self.inner.before_first(),
        }
    }

    fn after_last(&mut self) -> Result<(), OperationError> {
        self.current = None;
        match self.upper.clone() {
            Upper::Inclusive(u) => self.inner.after_key(&u),
            // Keys past the prefix are skipped on the way back.
            Upper::Prefix(_) | Upper::Unbounded => self.inner.after_last(),
        }
    }

    fn next(&mut self) -> Result<bool, OperationError> {
        self.advance(true)
    }

    fn previous(&mut self) -> Result<bool, OperationError> {
        self.advance(false)
    }

    fn available(&self) -> bool {
        self.current.is_some() && !self.inner.is_closed()
    }

    fn get(&self) -> Result<Candidate, OperationError> {
        check_open(self.inner.is_closed())?;
        self.current
            .clone()
            .ok_or(OperationError::InvalidCursorState)
    }

    fn before(&mut self, element: &Candidate) -> Result<(), OperationError> {
        let e = self.position(element)?;
        self.inner.before(&e)
    }

    fn after(&mut self, element: &Candidate) -> Result<(), OperationError> {
        let e = self.position(element)?;
        self.inner.after(&e)
    }

    fn close(&mut self) -> Result<(), OperationError> {
        self.current = None;
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
