//! Evaluators test whether one candidate satisfies a resolved filter term.
//!
//! Every term of a [`FilterResolved`] tree has an evaluator. Where an index
//! can answer the question for a single id the evaluator asks the index,
//! otherwise it loads the entry and matches its values. A loaded entry is
//! kept on the candidate so the rest of the tree does not load it again.

mod leaf;
mod logic;
mod scope;

use std::fmt;
use std::sync::Arc;

pub use self::leaf::{EqualityEvaluator, OrderingEvaluator, PresenceEvaluator, SubstringEvaluator};
pub use self::logic::{AndEvaluator, NotEvaluator, OrEvaluator};
pub use self::scope::ScopeEvaluator;

use crate::prelude::*;

pub trait Evaluator: Send + Sync + fmt::Debug {
    /// Test a candidate. The candidate's entry is loaded into it if the test
    /// needs it.
    fn evaluate(&self, candidate: &mut Candidate) -> Result<bool, OperationError>;

    /// Test an entry that is already in hand. The entry must carry its id.
    fn evaluate_entry(&self, entry: &Entry) -> Result<bool, OperationError>;

    fn evaluate_id(&self, id: EntryId) -> Result<bool, OperationError> {
        let mut candidate = Candidate::forward(IndexKey::Id(id), id);
        self.evaluate(&mut candidate)
    }

    /// The term this evaluator tests.
    fn filter(&self) -> &FilterResolved;
}

impl<E: Evaluator + ?Sized> Evaluator for Box<E> {
    fn evaluate(&self, candidate: &mut Candidate) -> Result<bool, OperationError> {
        (**self).evaluate(candidate)
    }

    fn evaluate_entry(&self, entry: &Entry) -> Result<bool, OperationError> {
        (**self).evaluate_entry(entry)
    }

    fn evaluate_id(&self, id: EntryId) -> Result<bool, OperationError> {
        (**self).evaluate_id(id)
    }

    fn filter(&self) -> &FilterResolved {
        (**self).filter()
    }
}

/// The entry of a candidate, loading it from the store on first use. `None`
/// when the entry has gone since the candidate was produced.
pub(crate) fn load_entry<'c>(
    store: &Store,
    candidate: &'c mut Candidate,
) -> Result<Option<&'c Arc<Entry>>, OperationError> {
    if candidate.entry().is_none() {
        match store.get_entry(candidate.id())? {
            Some(e) => candidate.set_entry(e),
            None => {
                filter_trace!(id = %candidate.id(), "candidate entry vanished");
                return Ok(None);
            }
        }
    }
    Ok(candidate.entry())
}

/// The attribute types whose values a test on `at` must look at: the type
/// itself, then its subtypes.
pub(crate) fn with_subtypes(store: &Store, at: &Arc<SchemaAttribute>) -> Vec<Arc<SchemaAttribute>> {
    let schema = store.schema();
    let mut types = vec![at.clone()];
    if schema.has_descendants(at) {
        types.extend(schema.descendants_of(at));
    }
    types
}

/// Matches nothing. Stands for a term on an attribute the schema does not
/// know, or a value the attribute's syntax rejects.
#[derive(Debug)]
pub struct UndefinedEvaluator {
    filter: FilterResolved,
}

impl UndefinedEvaluator {
    pub fn new(filter: FilterResolved) -> Self {
        UndefinedEvaluator { filter }
    }
}

impl Evaluator for UndefinedEvaluator {
    fn evaluate(&self, _candidate: &mut Candidate) -> Result<bool, OperationError> {
        Ok(false)
    }

    fn evaluate_entry(&self, _entry: &Entry) -> Result<bool, OperationError> {
        Ok(false)
    }

    fn filter(&self) -> &FilterResolved {
        &self.filter
    }
}
