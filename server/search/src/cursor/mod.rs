//! Candidate cursors.
//!
//! Each term of a resolved filter has a cursor that produces the ids of the
//! entries satisfying it. Leaf terms walk an index where there is one and
//! fall back to scanning every entry through the term's evaluator where there
//! is not. An and walks its cheapest child and evaluates the rest, an or
//! chains its children and drops ids an earlier child has produced.

mod leaf;
mod logic;
mod scope;

pub use self::leaf::{EqualityCursor, OrderingCursor, PresenceCursor, SubstringCursor};
pub use self::logic::{AndCursor, NotCursor, OrCursor};
pub use self::scope::ScopeCursor;

use crate::evaluator::Evaluator;
use crate::prelude::*;

/// A search candidate: the id of an entry, and the entry itself once an
/// evaluator has had to load it.
pub type Candidate = IndexEntry<IndexKey>;

pub type CandidateCursor<'a> = Box<dyn Cursor<Item = Candidate> + 'a>;

pub(crate) fn check_open(closed: bool) -> Result<(), OperationError> {
    if closed {
        filter_trace!("operation on a closed cursor");
        Err(OperationError::InvalidCursorState)
    } else {
        Ok(())
    }
}

/// Step `inner` in one direction until it lands on a candidate `accept`
/// takes, or runs out.
pub(crate) fn seek<C, F>(
    inner: &mut C,
    forward: bool,
    mut accept: F,
) -> Result<Option<Candidate>, OperationError>
where
    C: Cursor<Item = Candidate> + ?Sized,
    F: FnMut(&mut Candidate) -> Result<bool, OperationError>,
{
    loop {
        let more = if forward { inner.next()? } else { inner.previous()? };
        if !more {
            return Ok(None);
        }
        let mut c = inner.get()?;
        if accept(&mut c)? {
            return Ok(Some(c));
        }
    }
}

/// Implements [`Cursor`] for a wrapper whose `inner` field does the work.
macro_rules! delegate_cursor {
    ($t:ident) => {
        impl Cursor for $t<'_> {
            type Item = Candidate;

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

            fn get(&self) -> Result<Candidate, OperationError> {
                self.inner.get()
            }

            fn before(&mut self, element: &Candidate) -> Result<(), OperationError> {
                self.inner.before(element)
            }

            fn after(&mut self, element: &Candidate) -> Result<(), OperationError> {
                self.inner.after(element)
            }

            fn close(&mut self) -> Result<(), OperationError> {
                self.inner.close()
            }

            fn is_closed(&self) -> bool {
                self.inner.is_closed()
            }
        }
    };
}

pub(crate) use delegate_cursor;

/// Every entry of the store that an evaluator accepts. The source of
/// candidates for terms no index can answer.
#[derive(Debug)]
pub struct ScanCursor<'a> {
    inner: AllEntriesCursor,
    evaluator: Box<dyn Evaluator + 'a>,
    current: Option<Candidate>,
}

impl<'a> ScanCursor<'a> {
    pub fn new(store: &'a Store, evaluator: Box<dyn Evaluator + 'a>) -> Self {
        filter_trace!(filter = ?evaluator.filter(), "scanning all entries");
        ScanCursor {
            inner: store.all_entries(),
            evaluator,
            current: None,
        }
    }

    fn advance(&mut self, forward: bool) -> Result<bool, OperationError> {
        let evaluator = &self.evaluator;
        self.current = seek(&mut self.inner, forward, |c| evaluator.evaluate(c))?;
        Ok(self.current.is_some())
    }
}

impl Cursor for ScanCursor<'_> {
    type Item = Candidate;

    fn before_first(&mut self) -> Result<(), OperationError> {
        self.current = None;
        self.inner.before_first()
    }

    fn after_last(&mut self) -> Result<(), OperationError> {
        self.current = None;
        self.inner.after_last()
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
        self.current = None;
        self.inner.before(element)
    }

    fn after(&mut self, element: &Candidate) -> Result<(), OperationError> {
        self.current = None;
        self.inner.after(element)
    }

    fn close(&mut self) -> Result<(), OperationError> {
        self.current = None;
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Stops a search after a number of candidates. Moving forward past the
/// limit is an error when there would have been more candidates, and the
/// normal end of the cursor when there would not. A limit of 0 is no limit.
///
/// The limit counts forward moves from before the first candidate.
pub struct SizeLimitCursor<'a> {
    inner: CandidateCursor<'a>,
    limit: usize,
    returned: usize,
}

impl<'a> SizeLimitCursor<'a> {
    pub fn new(inner: CandidateCursor<'a>, limit: usize) -> Self {
        SizeLimitCursor {
            inner,
            limit,
            returned: 0,
        }
    }
}

impl std::fmt::Debug for SizeLimitCursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SizeLimitCursor")
            .field("limit", &self.limit)
            .field("returned", &self.returned)
            .finish()
    }
}

impl Cursor for SizeLimitCursor<'_> {
    type Item = Candidate;

    fn before_first(&mut self) -> Result<(), OperationError> {
        self.returned = 0;
        self.inner.before_first()
    }

    fn after_last(&mut self) -> Result<(), OperationError> {
        self.returned = 0;
        self.inner.after_last()
    }

    fn next(&mut self) -> Result<bool, OperationError> {
        if self.limit > 0 && self.returned >= self.limit {
            if self.inner.next()? {
                request_warn!(limit = self.limit, "size limit exceeded");
                return Err(OperationError::SizeLimitExceeded);
            }
            return Ok(false);
        }
        let more = self.inner.next()?;
        if more {
            self.returned += 1;
        }
        Ok(more)
    }

    fn previous(&mut self) -> Result<bool, OperationError> {
        let more = self.inner.previous()?;
        if more {
            self.returned = self.returned.saturating_sub(1);
        }
        Ok(more)
    }

    fn available(&self) -> bool {
        self.inner.available()
    }

    fn get(&self) -> Result<Candidate, OperationError> {
        self.inner.get()
    }

    fn close(&mut self) -> Result<(), OperationError> {
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
