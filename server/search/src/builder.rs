//! Builds the evaluator and cursor trees of a resolved filter.

use xdbm_partition::cursor::EmptyCursor;

use crate::cursor::{
    AndCursor, EqualityCursor, NotCursor, OrCursor, OrderingCursor, PresenceCursor, ScanCursor,
    ScopeCursor, SubstringCursor,
};
use crate::evaluator::{
    AndEvaluator, EqualityEvaluator, NotEvaluator, OrEvaluator, OrderingEvaluator,
    PresenceEvaluator, ScopeEvaluator, SubstringEvaluator, UndefinedEvaluator,
};
use crate::prelude::*;

pub struct EvaluatorBuilder<'a> {
    store: &'a Store,
}

impl<'a> EvaluatorBuilder<'a> {
    pub fn new(store: &'a Store) -> Self {
        EvaluatorBuilder { store }
    }

    pub fn build(&self, f: &FilterResolved) -> Result<Box<dyn Evaluator + 'a>, OperationError> {
        let store = self.store;
        let e: Box<dyn Evaluator + 'a> = match f {
            FilterResolved::Eq(..) | FilterResolved::Approx(..) => {
                Box::new(EqualityEvaluator::new(store, f.clone())?)
            }
            FilterResolved::Sub(..) => Box::new(SubstringEvaluator::new(store, f.clone())?),
            FilterResolved::Ge(..) | FilterResolved::Le(..) => {
                Box::new(OrderingEvaluator::new(store, f.clone())?)
            }
            FilterResolved::Pres(..) => Box::new(PresenceEvaluator::new(store, f.clone())?),
            FilterResolved::Scope(..) => Box::new(ScopeEvaluator::new(store, f.clone())?),
            FilterResolved::And(l, _) => Box::new(AndEvaluator::new(f.clone(), self.build_all(l)?)),
            FilterResolved::Or(l, _) => Box::new(OrEvaluator::new(f.clone(), self.build_all(l)?)),
            FilterResolved::Not(inner, _) => {
                Box::new(NotEvaluator::new(f.clone(), self.build(inner)?))
            }
            FilterResolved::Undefined(_) => Box::new(UndefinedEvaluator::new(f.clone())),
        };
        Ok(e)
    }

    fn build_all(
        &self,
        l: &[FilterResolved],
    ) -> Result<Vec<Box<dyn Evaluator + 'a>>, OperationError> {
        l.iter().map(|f| self.build(f)).collect()
    }
}

/// Builds the candidate cursor of a resolved filter. Every and walks its
/// first child, which after optimisation is the one with the lowest scan
/// count.
pub struct CursorBuilder<'a> {
    store: &'a Store,
    evaluators: EvaluatorBuilder<'a>,
}

impl<'a> CursorBuilder<'a> {
    pub fn new(store: &'a Store) -> Self {
        CursorBuilder {
            store,
            evaluators: EvaluatorBuilder::new(store),
        }
    }

    pub fn build(&self, f: &FilterResolved) -> Result<CandidateCursor<'a>, OperationError> {
        let store = self.store;
        let c: CandidateCursor<'a> = match f {
            FilterResolved::Eq(..) | FilterResolved::Approx(..) => Box::new(EqualityCursor::new(
                store,
                EqualityEvaluator::new(store, f.clone())?,
            )),
            FilterResolved::Sub(..) => Box::new(SubstringCursor::new(
                store,
                SubstringEvaluator::new(store, f.clone())?,
            )),
            FilterResolved::Ge(..) | FilterResolved::Le(..) => Box::new(OrderingCursor::new(
                store,
                OrderingEvaluator::new(store, f.clone())?,
            )),
            FilterResolved::Pres(..) => Box::new(PresenceCursor::new(
                store,
                PresenceEvaluator::new(store, f.clone())?,
            )),
            FilterResolved::Scope(..) => {
                Box::new(ScopeCursor::new(store, ScopeEvaluator::new(store, f.clone())?))
            }
            FilterResolved::And(l, _) => match l.split_first() {
                Some((first, rest)) => {
                    let primary = self.build(first)?;
                    let rest = rest
                        .iter()
                        .map(|f| self.evaluators.build(f))
                        .collect::<Result<Vec<_>, _>>()?;
                    Box::new(AndCursor::new(primary, rest))
                }
                None => Box::new(ScanCursor::new(store, self.evaluators.build(f)?)),
            },
            FilterResolved::Or(l, _) => {
                let branches = l
                    .iter()
                    .map(|f| Ok((self.build(f)?, self.evaluators.build(f)?)))
                    .collect::<Result<Vec<_>, OperationError>>()?;
                Box::new(OrCursor::new(branches))
            }
            FilterResolved::Not(inner, _) => Box::new(NotCursor::new(
                store,
                NotEvaluator::new(f.clone(), self.evaluators.build(inner)?),
            )),
            FilterResolved::Undefined(_) => Box::new(EmptyCursor::<Candidate>::new()),
        };
        filter_trace!(filter = ?f, "built candidate cursor");
        Ok(c)
    }
}
