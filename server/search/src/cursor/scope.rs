use xdbm_partition::be::index::ErasedIndexCursor;
use xdbm_partition::cursor::SingletonCursor;

use super::{check_open, Candidate, CandidateCursor};
use crate::evaluator::{Evaluator, ScopeEvaluator};
use crate::prelude::*;

/// The entries within the scope of a base entry.
///
/// Candidates come from the one level or sub level index of the base. When
/// aliases are dereferenced a second pass over the one alias or sub alias
/// index adds the alias targets that are not already in scope, and every
/// candidate is checked by the scope evaluator so aliases themselves drop
/// out.
pub struct ScopeCursor<'a> {
    evaluator: ScopeEvaluator<'a>,
    sources: Vec<CandidateCursor<'a>>,
    phase: usize,
    current: Option<Candidate>,
    closed: bool,
}

impl<'a> ScopeCursor<'a> {
    pub fn new(store: &'a Store, evaluator: ScopeEvaluator<'a>) -> Self {
        let a = *evaluator.assertion();
        let mut sources: Vec<CandidateCursor<'a>> = Vec::with_capacity(2);
        match a.scope {
            SearchScope::Base => {
                sources.push(Box::new(SingletonCursor::new(Candidate::forward(
                    IndexKey::Id(a.base),
                    a.base,
                ))));
            }
            SearchScope::OneLevel => {
                sources.push(Box::new(ErasedIndexCursor::new(
                    store.one_level_index().forward_cursor_key(&a.base),
                )));
                if a.deref {
                    sources.push(Box::new(ErasedIndexCursor::new(
                        store.one_alias_index().forward_cursor_key(&a.base),
                    )));
                }
            }
            SearchScope::Subtree if evaluator.is_whole_partition() => {
                sources.push(Box::new(store.all_entries()));
            }
            SearchScope::Subtree => {
                sources.push(Box::new(ErasedIndexCursor::new(
                    store.sub_level_index().forward_cursor_key(&a.base),
                )));
                if a.deref {
                    sources.push(Box::new(ErasedIndexCursor::new(
                        store.sub_alias_index().forward_cursor_key(&a.base),
                    )));
                }
            }
        }
        filter_trace!(scope = ?a.scope, base = %a.base, deref = a.deref, sources = sources.len(), "scope cursor");
        ScopeCursor {
            evaluator,
            sources,
            phase: 0,
            current: None,
            closed: false,
        }
    }

    fn advance(&mut self, forward: bool) -> Result<bool, OperationError> {
        check_open(self.closed)?;
        self.current = None;
        loop {
            let source = self
                .sources
                .get_mut(self.phase)
                .ok_or(OperationError::InvalidCursorState)?;
            let more = if forward {
                source.next()?
            } else {
                source.previous()?
            };

            if more {
                let mut c = source.get()?;
                // Alias targets already in scope came from the first source.
                if self.phase > 0 && self.evaluator.in_direct_scope(c.id())? {
                    continue;
                }
                if self.evaluator.evaluate(&mut c)? {
                    self.current = Some(c);
                    return Ok(true);
                }
                continue;
            }

            if forward && self.phase + 1 < self.sources.len() {
                self.phase += 1;
                if let Some(s) = self.sources.get_mut(self.phase) {
                    s.before_first()?;
                }
            } else if !forward && self.phase > 0 {
                self.phase -= 1;
                if let Some(s) = self.sources.get_mut(self.phase) {
                    s.after_last()?;
                }
            } else {
                return Ok(false);
            }
        }
    }
}

impl Cursor for ScopeCursor<'_> {
    type Item = Candidate;

    fn before_first(&mut self) -> Result<(), OperationError> {
        check_open(self.closed)?;
        self.current = None;
        self.phase = 0;
        match self.sources.first_mut() {
            Some(s) => s.before_first(),
            None => Ok(()),
        }
    }

    fn after_last(&mut self) -> Result<(), OperationError> {
        check_open(self.closed)?;
        self.current = None;
        self.phase = self.sources.len().saturating_sub(1);
        match self.sources.last_mut() {
            Some(s) => s.after_last(),
            None => Ok(()),
        }
    }

    fn next(&mut self) -> Result<bool, OperationError> {
        self.advance(true)
    }

    fn previous(&mut self) -> Result<bool, OperationError> {
        self.advance(false)
    }

    fn available(&self) -> bool {
        !self.closed && self.current.is_some()
    }

    fn get(&self) -> Result<Candidate, OperationError> {
        check_open(self.closed)?;
        self.current
            .clone()
            .ok_or(OperationError::InvalidCursorState)
    }

    fn close(&mut self) -> Result<(), OperationError> {
        self.current = None;
        self.closed = true;
        for s in self.sources.iter_mut() {
            s.close()?;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::ScopeCursor;
    use crate::evaluator::ScopeEvaluator;
    use crate::macros::*;
    use crate::prelude::*;

    fn scope(store: &Store, scope: SearchScope, base: EntryId, deref: bool) -> ScopeCursor<'_> {
        let a = ScopeAssertion { scope, base, deref };
        let e = ScopeEvaluator::new(store, FilterResolved::Scope(a, 0)).expect("scope");
        ScopeCursor::new(store, e)
    }

    #[test]
    fn test_scope_cursor_base() {
        run_search_test!(|store: &Store, ids: &Seeded| {
            let mut c = scope(store, SearchScope::Base, ids.groups, false);
            assert_eq!(collect_ids(&mut c), vec![ids.groups]);
            assert_eq!(collect_ids_rev(&mut c), vec![ids.groups]);
        })
    }

    #[test]
    fn test_scope_cursor_one_level() {
        run_search_test!(|store: &Store, ids: &Seeded| {
            let mut c = scope(store, SearchScope::OneLevel, ids.people, false);
            assert_eq!(
                collect_ids(&mut c),
                vec![ids.alice, ids.bob, ids.carol, ids.dave_alias]
            );

            let mut c = scope(store, SearchScope::OneLevel, ids.people, true);
            assert_eq!(
                collect_ids(&mut c),
                vec![ids.alice, ids.bob, ids.carol, ids.dave]
            );
            assert_eq!(
                collect_ids_rev(&mut c),
                vec![ids.dave, ids.carol, ids.bob, ids.alice]
            );

            let mut c = scope(store, SearchScope::OneLevel, ids.alice, false);
            assert!(collect_ids(&mut c).is_empty());
        })
    }

    #[test]
    fn test_scope_cursor_subtree() {
        run_search_test!(|store: &Store, ids: &Seeded| {
            let mut c = scope(store, SearchScope::Subtree, ids.ctx, false);
            assert_eq!(collect_ids(&mut c).len(), 10);

            let mut c = scope(store, SearchScope::Subtree, ids.people, false);
            assert_eq!(
                collect_ids(&mut c),
                vec![ids.people, ids.alice, ids.bob, ids.carol, ids.dave_alias]
            );

            let mut c = scope(store, SearchScope::Subtree, ids.people, true);
            assert_eq!(
                sorted(collect_ids(&mut c)),
                vec![ids.people, ids.alice, ids.bob, ids.carol, ids.dave]
            );

            // Everything except the alias, and dave only once.
            let mut c = scope(store, SearchScope::Subtree, ids.ctx, true);
            let found = collect_ids(&mut c);
            assert_eq!(found.len(), 9);
            assert!(!found.contains(&ids.dave_alias));
        })
    }

    #[test]
    fn test_scope_cursor_close() {
        run_search_test!(|store: &Store, ids: &Seeded| {
            let mut c = scope(store, SearchScope::OneLevel, ids.ctx, false);
            assert!(c.first().expect("first"));
            c.close().expect("close");
            assert!(!c.available());
            assert_eq!(c.next(), Err(OperationError::InvalidCursorState));
        })
    }
}
