use std::cmp::Ordering;
use std::sync::Arc;

use super::{load_entry, with_subtypes, Evaluator};
use crate::optimiser::SubstringMatch;
use crate::prelude::*;

fn wrong_term(kind: &str, filter: &FilterResolved) -> OperationError {
    filter_error!(?filter, "{} evaluator given the wrong kind of term", kind);
    OperationError::InvalidState
}

/// Normalised values of `types` on an entry, under `rule`. Values the rule
/// rejects can never match and are skipped.
fn normalised_values<'e>(
    entry: &'e Entry,
    types: &'e [Arc<SchemaAttribute>],
    rule: MatchingRule,
    schema: &'e dyn SchemaView,
) -> impl Iterator<Item = String> + 'e {
    types
        .iter()
        .filter_map(move |at| entry.get(at.name()))
        .flat_map(|a| a.iter())
        .filter_map(move |v| rule.normalize(schema, v).ok())
}

/// Tests equality, and approximate match which this store treats as
/// equality.
#[derive(Debug)]
pub struct EqualityEvaluator<'a> {
    store: &'a Store,
    filter: FilterResolved,
    attr: Arc<SchemaAttribute>,
    value: String,
    index: Option<&'a Index<String>>,
    types: Vec<Arc<SchemaAttribute>>,
}

impl<'a> EqualityEvaluator<'a> {
    pub fn new(store: &'a Store, filter: FilterResolved) -> Result<Self, OperationError> {
        let (attr, value) = match &filter {
            FilterResolved::Eq(at, v, _) | FilterResolved::Approx(at, v, _) => {
                (at.clone(), v.clone())
            }
            f => return Err(wrong_term("equality", f)),
        };
        Ok(EqualityEvaluator {
            store,
            index: store.value_index(attr.name()),
            types: with_subtypes(store, &attr),
            attr,
            value,
            filter,
        })
    }

    pub fn index(&self) -> Option<&'a Index<String>> {
        self.index
    }

    /// The normalised assertion value.
    pub fn value(&self) -> &String {
        &self.value
    }
}

impl Evaluator for EqualityEvaluator<'_> {
    fn evaluate(&self, candidate: &mut Candidate) -> Result<bool, OperationError> {
        if let Some(idx) = self.index {
            return idx.reverse(candidate.id(), &self.value);
        }
        match load_entry(self.store, candidate)? {
            Some(e) => self.evaluate_entry(e),
            None => Ok(false),
        }
    }

    fn evaluate_entry(&self, entry: &Entry) -> Result<bool, OperationError> {
        let rule = self.attr.equality_rule();
        let schema = self.store.schema();
        Ok(normalised_values(entry, &self.types, rule, schema)
            .any(|v| rule.compare(&v, &self.value) == Ordering::Equal))
    }

    fn filter(&self) -> &FilterResolved {
        &self.filter
    }
}

#[derive(Debug)]
pub struct SubstringEvaluator<'a> {
    store: &'a Store,
    filter: FilterResolved,
    attr: Arc<SchemaAttribute>,
    matcher: SubstringMatch,
    index: Option<&'a Index<String>>,
    types: Vec<Arc<SchemaAttribute>>,
}

impl<'a> SubstringEvaluator<'a> {
    pub fn new(store: &'a Store, filter: FilterResolved) -> Result<Self, OperationError> {
        let (attr, matcher) = match &filter {
            FilterResolved::Sub(at, sm, _) => (at.clone(), sm.clone()),
            f => return Err(wrong_term("substring", f)),
        };
        Ok(SubstringEvaluator {
            store,
            index: store.value_index(attr.name()),
            types: with_subtypes(store, &attr),
            attr,
            matcher,
            filter,
        })
    }

    pub fn index(&self) -> Option<&'a Index<String>> {
        self.index
    }

    pub fn matcher(&self) -> &SubstringMatch {
        &self.matcher
    }

    pub fn is_byte_ordered(&self) -> bool {
        self.attr.substring_or_equality().is_byte_ordered()
    }

    /// Test an index key.
    pub fn key_matches(&self, key: &str) -> bool {
        self.matcher.is_match(key)
    }
}

impl Evaluator for SubstringEvaluator<'_> {
    fn evaluate(&self, candidate: &mut Candidate) -> Result<bool, OperationError> {
        if let Some(idx) = self.index {
            return Ok(idx
                .reverse_values(candidate.id())?
                .iter()
                .any(|k| self.matcher.is_match(k)));
        }
        match load_entry(self.store, candidate)? {
            Some(e) => self.evaluate_entry(e),
            None => Ok(false),
        }
    }

    fn evaluate_entry(&self, entry: &Entry) -> Result<bool, OperationError> {
        let rule = self.attr.substring_or_equality();
        Ok(normalised_values(entry, &self.types, rule, self.store.schema())
            .any(|v| self.matcher.is_match(&v)))
    }

    fn filter(&self) -> &FilterResolved {
        &self.filter
    }
}

/// Tests greater-or-equal and less-or-equal assertions.
#[derive(Debug)]
pub struct OrderingEvaluator<'a> {
    store: &'a Store,
    filter: FilterResolved,
    attr: Arc<SchemaAttribute>,
    value: String,
    greater: bool,
    index: Option<&'a Index<String>>,
    types: Vec<Arc<SchemaAttribute>>,
}

impl<'a> OrderingEvaluator<'a> {
    pub fn new(store: &'a Store, filter: FilterResolved) -> Result<Self, OperationError> {
        let (attr, value, greater) = match &filter {
            FilterResolved::Ge(at, v, _) => (at.clone(), v.clone(), true),
            FilterResolved::Le(at, v, _) => (at.clone(), v.clone(), false),
            f => return Err(wrong_term("ordering", f)),
        };
        Ok(OrderingEvaluator {
            store,
            index: store.value_index(attr.name()),
            types: with_subtypes(store, &attr),
            attr,
            value,
            greater,
            filter,
        })
    }

    pub fn index(&self) -> Option<&'a Index<String>> {
        self.index
    }

    pub fn value(&self) -> &String {
        &self.value
    }

    /// True for `>=`, false for `<=`.
    pub fn is_greater(&self) -> bool {
        self.greater
    }

    pub fn is_byte_ordered(&self) -> bool {
        self.attr.ordering_or_equality().is_byte_ordered()
    }

    /// Test a value already normalised by the ordering rule.
    pub fn key_matches(&self, key: &str) -> bool {
        let o = self.attr.ordering_or_equality().compare(key, &self.value);
        if self.greater {
            o != Ordering::Less
        } else {
            o != Ordering::Greater
        }
    }
}

impl Evaluator for OrderingEvaluator<'_> {
    fn evaluate(&self, candidate: &mut Candidate) -> Result<bool, OperationError> {
        if let Some(idx) = self.index {
            let id = candidate.id();
            return match (self.is_byte_ordered(), self.greater) {
                (true, true) => idx.reverse_greater_or_eq(id, &self.value),
                (true, false) => idx.reverse_less_or_eq(id, &self.value),
                (false, _) => Ok(idx.reverse_values(id)?.iter().any(|k| self.key_matches(k))),
            };
        }
        match load_entry(self.store, candidate)? {
            Some(e) => self.evaluate_entry(e),
            None => Ok(false),
        }
    }

    fn evaluate_entry(&self, entry: &Entry) -> Result<bool, OperationError> {
        let rule = self.attr.ordering_or_equality();
        Ok(normalised_values(entry, &self.types, rule, self.store.schema())
            .any(|v| self.key_matches(&v)))
    }

    fn filter(&self) -> &FilterResolved {
        &self.filter
    }
}

#[derive(Debug)]
pub struct PresenceEvaluator<'a> {
    store: &'a Store,
    filter: FilterResolved,
    attr: Arc<SchemaAttribute>,
    indexed: bool,
    types: Vec<Arc<SchemaAttribute>>,
}

impl<'a> PresenceEvaluator<'a> {
    pub fn new(store: &'a Store, filter: FilterResolved) -> Result<Self, OperationError> {
        let attr = match &filter {
            FilterResolved::Pres(at, _) => at.clone(),
            f => return Err(wrong_term("presence", f)),
        };
        Ok(PresenceEvaluator {
            store,
            indexed: store.has_user_index(attr.name()),
            types: with_subtypes(store, &attr),
            attr,
            filter,
        })
    }

    /// The key of this attribute in the presence index, if it has one.
    pub fn presence_key(&self) -> Option<&String> {
        if self.indexed {
            Some(&self.attr.oid)
        } else {
            None
        }
    }

    pub fn is_objectclass(&self) -> bool {
        self.attr.name() == ATTR_OBJECTCLASS
    }
}

impl Evaluator for PresenceEvaluator<'_> {
    fn evaluate(&self, candidate: &mut Candidate) -> Result<bool, OperationError> {
        // Every entry has an object class.
        if self.is_objectclass() {
            return Ok(true);
        }
        if let Some(oid) = self.presence_key() {
            return self.store.presence_index().reverse(candidate.id(), oid);
        }
        match load_entry(self.store, candidate)? {
            Some(e) => self.evaluate_entry(e),
            None => Ok(false),
        }
    }

    fn evaluate_entry(&self, entry: &Entry) -> Result<bool, OperationError> {
        Ok(self.types.iter().any(|at| entry.contains(at.name())))
    }

    fn filter(&self) -> &FilterResolved {
        &self.filter
    }
}
