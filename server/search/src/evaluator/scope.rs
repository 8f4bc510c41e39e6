use super::Evaluator;
use crate::prelude::*;

/// Tests whether a candidate lies within the scope of a base entry.
///
/// With alias dereferencing on, aliases themselves are never in scope, and
/// the targets of aliases within the scope are.
#[derive(Debug)]
pub struct ScopeEvaluator<'a> {
    store: &'a Store,
    filter: FilterResolved,
    assertion: ScopeAssertion,
    base_is_context: bool,
}

impl<'a> ScopeEvaluator<'a> {
    pub fn new(store: &'a Store, filter: FilterResolved) -> Result<Self, OperationError> {
        let FilterResolved::Scope(assertion, _) = &filter else {
            filter_error!(?filter, "scope evaluator given the wrong kind of term");
            return Err(OperationError::InvalidState);
        };
        let assertion = *assertion;
        Ok(ScopeEvaluator {
            store,
            base_is_context: store.context_id()? == Some(assertion.base),
            assertion,
            filter,
        })
    }

    pub fn assertion(&self) -> &ScopeAssertion {
        &self.assertion
    }

    /// Subtree of the context entry without dereferencing holds every entry.
    pub fn is_whole_partition(&self) -> bool {
        self.base_is_context && self.assertion.scope == SearchScope::Subtree && !self.assertion.deref
    }

    /// In scope by position in the tree, ignoring aliases.
    pub fn in_direct_scope(&self, id: EntryId) -> Result<bool, OperationError> {
        let base = &self.assertion.base;
        match self.assertion.scope {
            SearchScope::Base => Ok(id == *base),
            SearchScope::OneLevel => self.store.one_level_index().forward(base, id),
            SearchScope::Subtree if self.base_is_context => Ok(true),
            SearchScope::Subtree => self.store.sub_level_index().forward(base, id),
        }
    }

    /// In scope as the target of an alias within the scope.
    pub fn in_alias_scope(&self, id: EntryId) -> Result<bool, OperationError> {
        let base = &self.assertion.base;
        match self.assertion.scope {
            SearchScope::Base => Ok(false),
            SearchScope::OneLevel => self.store.one_alias_index().forward(base, id),
            SearchScope::Subtree => self.store.sub_alias_index().forward(base, id),
        }
    }

    fn evaluate_scope(&self, id: EntryId) -> Result<bool, OperationError> {
        if !self.assertion.deref {
            return self.in_direct_scope(id);
        }
        if self.store.is_alias(id)? {
            return Ok(false);
        }
        if self.in_direct_scope(id)? {
            return Ok(true);
        }
        self.in_alias_scope(id)
    }
}

impl Evaluator for ScopeEvaluator<'_> {
    fn evaluate(&self, candidate: &mut Candidate) -> Result<bool, OperationError> {
        self.evaluate_scope(candidate.id())
    }

    fn evaluate_entry(&self, entry: &Entry) -> Result<bool, OperationError> {
        let id = entry.id().ok_or_else(|| {
            filter_error!(dn = %entry.dn(), "scope test of an entry without an id");
            OperationError::InvalidEntryId
        })?;
        self.evaluate_scope(id)
    }

    fn filter(&self) -> &FilterResolved {
        &self.filter
    }
}
