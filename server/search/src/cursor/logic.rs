use idlset::v2::IDLBitRange;

use super::{check_open, delegate_cursor, seek, Candidate, CandidateCursor, ScanCursor};
use crate::evaluator::{Evaluator, NotEvaluator};
use crate::prelude::*;

/// Walks the cheapest child of an and, and keeps the candidates every other
/// child accepts.
pub struct AndCursor<'a> {
    primary: CandidateCursor<'a>,
    evaluators: Vec<Box<dyn Evaluator + 'a>>,
    current: Option<Candidate>,
}

impl<'a> AndCursor<'a> {
    pub fn new(primary: CandidateCursor<'a>, evaluators: Vec<Box<dyn Evaluator + 'a>>) -> Self {
        AndCursor {
            primary,
            evaluators,
            current: None,
        }
    }

    fn advance(&mut self, forward: bool) -> Result<bool, OperationError> {
        let evaluators = &self.evaluators;
        self.current = seek(&mut self.primary, forward, |c| {
            for e in evaluators.iter() {
                if !e.evaluate(c)? {
                    return Ok(false);
                }
            }
            Ok(true)
        })?;
        Ok(self.current.is_some())
    }
}

impl Cursor for AndCursor<'_> {
    type Item = Candidate;

    fn before_first(&mut self) -> Result<(), OperationError> {
        self.current = None;
        self.primary.before_first()
    }

    fn after_last(&mut self) -> Result<(), OperationError> {
        self.current = None;
        self.primary.after_last()
    }

    fn next(&mut self) -> Result<bool, OperationError> {
        self.advance(true)
    }

    fn previous(&mut self) -> Result<bool, OperationError> {
        self.advance(false)
    }

    fn available(&self) -> bool {
        self.current.is_some() && !self.primary.is_closed()
    }

    fn get(&self) -> Result<Candidate, OperationError> {
        check_open(self.primary.is_closed())?;
        self.current
            .clone()
            .ok_or(OperationError::InvalidCursorState)
    }

    fn before(&mut self, element: &Candidate) -> Result<(), OperationError> {
        self.current = None;
        self.primary.before(element)
    }

    fn after(&mut self, element: &Candidate) -> Result<(), OperationError> {
        self.current = None;
        self.primary.after(element)
    }

    fn close(&mut self) -> Result<(), OperationError> {
        self.current = None;
        self.primary.close()
    }

    fn is_closed(&self) -> bool {
        self.primary.is_closed()
    }
}

/// Chains the children of an or, yielding each id once.
///
/// A candidate from branch `i` is a duplicate if any branch before `i`
/// accepts it. Each branch keeps a blacklist of the ids known to be
/// duplicates there: when a candidate is yielded it is added to the
/// blacklist of every later branch that accepts it. On a single forward pass
/// from the start the blacklists are complete by the time a branch is
/// reached. After any other movement a candidate not on the blacklist is
/// also tested against the earlier branches.
///
/// A candidate belongs to the first branch that accepts it, so `before` and
/// `after` position that branch and resume the chain from there.
pub struct OrCursor<'a> {
    branches: Vec<(CandidateCursor<'a>, Box<dyn Evaluator + 'a>)>,
    blacklists: Vec<IDLBitRange>,
    phase: usize,
    swept: bool,
    current: Option<Candidate>,
    closed: bool,
}

impl<'a> OrCursor<'a> {
    pub fn new(branches: Vec<(CandidateCursor<'a>, Box<dyn Evaluator + 'a>)>) -> Self {
        let blacklists = branches.iter().map(|_| IDLBitRange::new()).collect();
        OrCursor {
            branches,
            blacklists,
            phase: 0,
            swept: false,
            current: None,
            closed: false,
        }
    }

    fn is_duplicate(&mut self, phase: usize, c: &mut Candidate) -> Result<bool, OperationError> {
        let id = c.id().as_u64();
        if self.blacklists.get(phase).map(|b| b.contains(id)).unwrap_or(false) {
            return Ok(true);
        }
        if self.swept {
            return Ok(false);
        }
        for (_, e) in self.branches.iter().take(phase) {
            if e.evaluate(c)? {
                if let Some(b) = self.blacklists.get_mut(phase) {
                    b.insert_id(id);
                }
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn blacklist_later(&mut self, phase: usize, c: &mut Candidate) -> Result<(), OperationError> {
        let id = c.id().as_u64();
        for ((_, e), b) in self
            .branches
            .iter()
            .zip(self.blacklists.iter_mut())
            .skip(phase + 1)
        {
            if e.evaluate(c)? {
                b.insert_id(id);
            }
        }
        Ok(())
    }

    /// Make the branch owning `element` the current phase and return it.
    fn position(&mut self, element: &Candidate) -> Result<&mut CandidateCursor<'a>, OperationError> {
        check_open(self.closed)?;
        self.current = None;
        self.swept = false;
        let mut c = element.clone();
        let mut owner = None;
        for (i, (_, e)) in self.branches.iter().enumerate() {
            if e.evaluate(&mut c)? {
                owner = Some(i);
                break;
            }
        }
        let Some(phase) = owner else {
            filter_trace!(id = %element.id(), "no branch of the or holds the candidate");
            return Err(OperationError::UnsupportedCursorOperation);
        };
        self.phase = phase;
        self.branches
            .get_mut(phase)
            .map(|(cursor, _)| cursor)
            .ok_or(OperationError::InvalidCursorState)
    }

    fn advance(&mut self, forward: bool) -> Result<bool, OperationError> {
        check_open(self.closed)?;
        self.current = None;
        if !forward {
            self.swept = false;
        }
        loop {
            let Some((cursor, _)) = self.branches.get_mut(self.phase) else {
                return Ok(false);
            };
            let more = if forward {
                cursor.next()?
            } else {
                cursor.previous()?
            };

            if more {
                let mut c = cursor.get()?;
                let phase = self.phase;
                if self.is_duplicate(phase, &mut c)? {
                    continue;
                }
                self.blacklist_later(phase, &mut c)?;
                self.current = Some(c);
                return Ok(true);
            }

            if forward && self.phase + 1 < self.branches.len() {
                self.phase += 1;
                if let Some((cursor, _)) = self.branches.get_mut(self.phase) {
                    cursor.before_first()?;
                }
            } else if !forward && self.phase > 0 {
                self.phase -= 1;
                if let Some((cursor, _)) = self.branches.get_mut(self.phase) {
                    cursor.after_last()?;
                }
            } else {
                return Ok(false);
            }
        }
    }
}

impl Cursor for OrCursor<'_> {
    type Item = Candidate;

    fn before_first(&mut self) -> Result<(), OperationError> {
        check_open(self.closed)?;
        self.current = None;
        self.phase = 0;
        self.swept = true;
        match self.branches.first_mut() {
            Some((cursor, _)) => cursor.before_first(),
            None => Ok(()),
        }
    }

    fn after_last(&mut self) -> Result<(), OperationError> {
        check_open(self.closed)?;
        self.current = None;
        self.phase = self.branches.len().saturating_sub(1);
        self.swept = false;
        match self.branches.last_mut() {
            Some((cursor, _)) => cursor.after_last(),
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

    fn before(&mut self, element: &Candidate) -> Result<(), OperationError> {
        self.position(element)?.before(element)
    }

    fn after(&mut self, element: &Candidate) -> Result<(), OperationError> {
        self.position(element)?.after(element)
    }

    fn close(&mut self) -> Result<(), OperationError> {
        self.current = None;
        self.closed = true;
        for (cursor, _) in self.branches.iter_mut() {
            cursor.close()?;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Every entry the negated term rejects. No index can answer a not, so this
/// is always a scan.
pub struct NotCursor<'a> {
    inner: ScanCursor<'a>,
}

impl<'a> NotCursor<'a> {
    pub fn new(store: &'a Store, evaluator: NotEvaluator<'a>) -> Self {
        NotCursor {
            inner: ScanCursor::new(store, Box::new(evaluator)),
        }
    }
}

delegate_cursor!(NotCursor);

#[cfg(test)]
mod tests {
    use crate::macros::*;
    use crate::prelude::*;

    #[test]
    fn test_and_cursor() {
        run_search_test!(|store: &Store, ids: &Seeded| {
            let f = f_and(vec![f_eq("sn", "smith"), f_ge("uidNumber", "1000")]);
            let mut c = filter_cursor(store, &f);
            assert_eq!(collect_ids(&mut c), vec![ids.alice]);

            let f = f_and(vec![f_pres("uid"), f_sub("cn", Some("d"), &[], None)]);
            let mut c = filter_cursor(store, &f);
            assert_eq!(collect_ids(&mut c), vec![ids.dave]);
            assert_eq!(collect_ids_rev(&mut c), vec![ids.dave]);

            // The empty and holds every entry.
            let mut c = filter_cursor(store, &f_and(vec![]));
            assert_eq!(collect_ids(&mut c).len(), 10);
        })
    }

    #[test]
    fn test_or_cursor_dedups() {
        run_search_test!(|store: &Store, ids: &Seeded| {
            // alice and carol match both branches.
            let f = f_or(vec![
                f_eq("sn", "smith"),
                f_sub("uid", None, &["a"], None),
                f_eq("uid", "alice"),
            ]);
            let mut c = filter_cursor(store, &f);
            let fwd = collect_ids(&mut c);
            assert_eq!(sorted(fwd.clone()), vec![ids.alice, ids.carol, ids.dave]);
            assert_eq!(fwd.len(), 3);

            let back = collect_ids_rev(&mut c);
            assert_eq!(sorted(back.clone()), vec![ids.alice, ids.carol, ids.dave]);
            assert_eq!(back.len(), 3);

            // The same again, now that the blacklists are warm.
            assert_eq!(collect_ids(&mut c), fwd);
        })
    }

    #[test]
    fn test_or_cursor_mixed_directions() {
        run_search_test!(|store: &Store, ids: &Seeded| {
            let f = f_or(vec![f_eq("uid", "bob"), f_pres("uid"), f_eq("cn", "admins")]);
            let mut c = filter_cursor(store, &f);
            let mut seen = Vec::new();
            c.after_last().expect("after_last");
            while c.previous().expect("previous") {
                seen.push(c.get().expect("get").id());
            }
            assert_eq!(
                sorted(seen),
                vec![ids.alice, ids.bob, ids.carol, ids.dave, ids.admins]
            );

            let mut c = filter_cursor(store, &f_or(vec![]));
            assert!(collect_ids(&mut c).is_empty());
        })
    }

    #[test]
    fn test_or_cursor_overlapping_seeks() {
        run_search_test!(|store: &Store, ids: &Seeded| {
            // alice is in every branch, carol and admins in two.
            let f = f_or(vec![
                f_eq("sn", "smith"),
                f_sub("cn", Some("a"), &[], None),
                f_pres("uid"),
            ]);
            let mut c = filter_cursor(store, &f);
            let fwd = collect_ids(&mut c);
            assert_eq!(
                sorted(fwd.clone()),
                vec![ids.alice, ids.bob, ids.carol, ids.dave, ids.admins]
            );

            // Straight from the end, before any forward pass.
            let mut c = filter_cursor(store, &f);
            let mut back = collect_ids_rev(&mut c);
            back.reverse();
            assert_eq!(back, fwd);

            c.before_first().expect("before_first");
            let mut found = Vec::new();
            while c.next().expect("next") {
                found.push(c.get().expect("get"));
            }
            assert_eq!(found.len(), fwd.len());

            for (i, cand) in found.iter().enumerate() {
                c.before(cand).expect("before");
                let mut rest = Vec::new();
                while c.next().expect("next") {
                    rest.push(c.get().expect("get").id());
                }
                assert_eq!(rest, fwd[i..].to_vec());

                c.after(cand).expect("after");
                let mut upto = Vec::new();
                while c.previous().expect("previous") {
                    upto.push(c.get().expect("get").id());
                }
                upto.reverse();
                assert_eq!(upto, fwd[..=i].to_vec());
            }

            // A full sweep back after the seeks still sees each id once.
            let mut back = collect_ids_rev(&mut c);
            back.reverse();
            assert_eq!(back, fwd);
        })
    }

    #[test]
    fn test_not_cursor() {
        run_search_test!(|store: &Store, ids: &Seeded| {
            let mut c = filter_cursor(store, &f_not(f_pres("uid")));
            assert_eq!(
                collect_ids(&mut c),
                vec![ids.ctx, ids.people, ids.contractors, ids.groups, ids.admins, ids.dave_alias]
            );

            let f = f_and(vec![f_pres("cn"), f_not(f_eq("sn", "smith"))]);
            let mut c = filter_cursor(store, &f);
            assert_eq!(
                collect_ids(&mut c),
                vec![ids.bob, ids.dave, ids.admins, ids.dave_alias]
            );
        })
    }

    #[test]
    fn test_undefined_cursor() {
        run_search_test!(|store: &Store, ids: &Seeded| {
            let mut c = filter_cursor(store, &f_eq("nosuchattr", "x"));
            assert!(collect_ids(&mut c).is_empty());

            let f = f_or(vec![f_eq("nosuchattr", "x"), f_eq("uid", "carol")]);
            let mut c = filter_cursor(store, &f);
            assert_eq!(collect_ids(&mut c), vec![ids.carol]);
        })
    }
}
