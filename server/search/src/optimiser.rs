//! Resolution and optimisation of filters.
//!
//! [`Optimiser::resolve`] checks every attribute of a [`Filter`] against the
//! schema, normalises assertion values with the attribute's matching rules,
//! and annotates each term with a scan count: an estimate, taken from the
//! indices, of how many candidates the term would produce. Terms that can
//! only be answered by scanning every entry carry [`SCAN_COUNT_UNINDEXED`].
//!
//! The annotated tree is then folded and sorted so that the terms of an and
//! are in ascending count order. The first term of an and becomes the
//! candidate source and the rest are only evaluated, so the cheapest term
//! drives the search.

use std::cmp::Ordering;
use std::sync::Arc;

use regex::Regex;

use crate::prelude::*;

/// The scan count of a term no index can answer.
pub const SCAN_COUNT_UNINDEXED: u64 = u64::MAX;

/// A compiled substring assertion.
#[derive(Debug, Clone)]
pub struct SubstringMatch {
    /// Normalised pieces.
    pub initial: Option<String>,
    pub any: Vec<String>,
    pub terminal: Option<String>,
    regex: Regex,
}

impl SubstringMatch {
    fn new(
        rule: MatchingRule,
        schema: &dyn SchemaView,
        assertion: &SubstringAssertion,
    ) -> Result<Self, OperationError> {
        let norm = |s: &String| rule.normalize(schema, s);
        let initial = assertion.initial.as_ref().map(norm).transpose()?;
        let any = assertion.any.iter().map(norm).collect::<Result<Vec<_>, _>>()?;
        let terminal = assertion.terminal.as_ref().map(norm).transpose()?;

        let mut pattern = String::from("(?s)^");
        if let Some(i) = &initial {
            pattern.push_str(&regex::escape(i));
        }
        pattern.push_str(".*");
        for a in any.iter() {
            pattern.push_str(&regex::escape(a));
            pattern.push_str(".*");
        }
        if let Some(t) = &terminal {
            pattern.push_str(&regex::escape(t));
        }
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|e| {
            filter_error!(?e, %pattern, "unable to compile substring pattern");
            OperationError::FilterParseError
        })?;

        Ok(SubstringMatch {
            initial,
            any,
            terminal,
            regex,
        })
    }

    /// Test a value normalised by the substring rule.
    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

impl PartialEq for SubstringMatch {
    fn eq(&self, other: &Self) -> bool {
        self.initial == other.initial && self.any == other.any && self.terminal == other.terminal
    }
}

impl Eq for SubstringMatch {}

/// Restricts candidates to the entries within a scope of a base entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeAssertion {
    pub scope: SearchScope,
    pub base: EntryId,
    /// Dereference aliases while searching: aliases are not candidates, and
    /// alias targets extend the scope.
    pub deref: bool,
}

/// A filter resolved against the schema and annotated with scan counts.
/// Values are normalised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterResolved {
    Eq(Arc<SchemaAttribute>, String, u64),
    Approx(Arc<SchemaAttribute>, String, u64),
    Sub(Arc<SchemaAttribute>, SubstringMatch, u64),
    Ge(Arc<SchemaAttribute>, String, u64),
    Le(Arc<SchemaAttribute>, String, u64),
    Pres(Arc<SchemaAttribute>, u64),
    Scope(ScopeAssertion, u64),
    And(Vec<FilterResolved>, u64),
    Or(Vec<FilterResolved>, u64),
    Not(Box<FilterResolved>, u64),
    /// A term on an attribute the schema does not know, or with a value the
    /// attribute's syntax rejects. It matches nothing.
    Undefined(AttrString),
}

impl FilterResolved {
    pub fn count(&self) -> u64 {
        match self {
            FilterResolved::Eq(_, _, c)
            | FilterResolved::Approx(_, _, c)
            | FilterResolved::Sub(_, _, c)
            | FilterResolved::Ge(_, _, c)
            | FilterResolved::Le(_, _, c)
            | FilterResolved::Pres(_, c)
            | FilterResolved::Scope(_, c)
            | FilterResolved::And(_, c)
            | FilterResolved::Or(_, c)
            | FilterResolved::Not(_, c) => *c,
            FilterResolved::Undefined(_) => 0,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, FilterResolved::Undefined(_))
    }

    fn rank(&self) -> u8 {
        match self {
            FilterResolved::Undefined(_) => 0,
            FilterResolved::Eq(..) => 1,
            FilterResolved::Scope(..) => 2,
            FilterResolved::Pres(..) => 3,
            FilterResolved::Approx(..) => 4,
            FilterResolved::Ge(..) | FilterResolved::Le(..) => 5,
            FilterResolved::Sub(..) => 6,
            FilterResolved::And(..) => 7,
            FilterResolved::Or(..) => 8,
            FilterResolved::Not(..) => 9,
        }
    }

    /// Fold nested terms, sort and deduplicate.
    pub fn optimise(&self) -> Self {
        match self {
            FilterResolved::And(f_list, c) => {
                let (f_list_and, mut f_list_new): (Vec<_>, Vec<_>) = f_list
                    .iter()
                    .map(|f_ref| f_ref.optimise())
                    .partition(|f| matches!(f, FilterResolved::And(_, _)));

                f_list_and.into_iter().for_each(|fc| {
                    if let FilterResolved::And(mut l, _) = fc {
                        f_list_new.append(&mut l)
                    }
                });

                // Any term that matches nothing decides the whole and.
                if let Some(u) = f_list_new.iter().find(|f| f.is_undefined()) {
                    return u.clone();
                }

                if f_list_new.is_empty() {
                    // The empty and, true for every entry.
                    return FilterResolved::And(f_list_new, *c);
                }

                if f_list_new.len() == 1 {
                    #[allow(clippy::expect_used)]
                    return f_list_new.pop().expect("corrupt?");
                }

                f_list_new.sort();
                f_list_new.dedup();
                // The head is the cheapest term and bounds the whole and.
                let c = f_list_new.first().map(|f| f.count()).unwrap_or(0);
                FilterResolved::And(f_list_new, c)
            }
            FilterResolved::Or(f_list, _) => {
                let (f_list_or, f_list_new): (Vec<_>, Vec<_>) = f_list
                    .iter()
                    .map(|f_ref| f_ref.optimise())
                    .partition(|f| matches!(f, FilterResolved::Or(_, _)));

                let mut undefined = None;
                let mut f_list_new: Vec<FilterResolved> = f_list_new
                    .into_iter()
                    .chain(f_list_or.into_iter().flat_map(|fc| match fc {
                        FilterResolved::Or(l, _) => l,
                        f => vec![f],
                    }))
                    .filter(|f| {
                        if f.is_undefined() {
                            undefined.get_or_insert_with(|| f.clone());
                            false
                        } else {
                            true
                        }
                    })
                    .collect();

                if f_list_new.is_empty() {
                    // Either every term matched nothing, or this was the
                    // empty or which is false anyway.
                    return undefined.unwrap_or(FilterResolved::Or(f_list_new, 0));
                }

                if f_list_new.len() == 1 {
                    #[allow(clippy::expect_used)]
                    return f_list_new.pop().expect("corrupt?");
                }

                // Most expensive first, so a candidate is tested against the
                // broadest terms before the narrow ones.
                #[allow(clippy::unnecessary_sort_by)]
                f_list_new.sort_by(|a, b| b.cmp(a));
                f_list_new.dedup();
                let c = f_list_new
                    .iter()
                    .fold(0u64, |acc, f| acc.saturating_add(f.count()));
                FilterResolved::Or(f_list_new, c)
            }
            FilterResolved::Not(f, c) => match f.optimise() {
                FilterResolved::Not(inner, _) => *inner,
                inner => FilterResolved::Not(Box::new(inner), *c),
            },
            f => f.clone(),
        }
    }
}

impl PartialOrd for FilterResolved {
    fn partial_cmp(&self, rhs: &FilterResolved) -> Option<Ordering> {
        Some(self.cmp(rhs))
    }
}

impl Ord for FilterResolved {
    /// Ascending scan count. Equal counts fall back to the kind of term, then
    /// to attribute and value so that duplicates end up adjacent.
    fn cmp(&self, rhs: &FilterResolved) -> Ordering {
        self.count()
            .cmp(&rhs.count())
            .then_with(|| self.rank().cmp(&rhs.rank()))
            .then_with(|| match (self, rhs) {
                (FilterResolved::Eq(a1, v1, _), FilterResolved::Eq(a2, v2, _))
                | (FilterResolved::Approx(a1, v1, _), FilterResolved::Approx(a2, v2, _))
                | (FilterResolved::Ge(a1, v1, _), FilterResolved::Ge(a2, v2, _))
                | (FilterResolved::Le(a1, v1, _), FilterResolved::Le(a2, v2, _)) => {
                    a1.oid.cmp(&a2.oid).then_with(|| v1.cmp(v2))
                }
                (FilterResolved::Pres(a1, _), FilterResolved::Pres(a2, _)) => a1.oid.cmp(&a2.oid),
                (FilterResolved::Undefined(a1), FilterResolved::Undefined(a2)) => a1.cmp(a2),
                // They can't be re-arranged, they don't move!
                (_, _) => Ordering::Equal,
            })
    }
}

/// Resolves filters against the schema and the indices of one store.
pub struct Optimiser<'a> {
    store: &'a Store,
}

impl<'a> Optimiser<'a> {
    pub fn new(store: &'a Store) -> Self {
        Optimiser { store }
    }

    #[instrument(level = "debug", name = "search::resolve", skip_all)]
    pub fn resolve(&self, f: &Filter) -> Result<FilterResolved, OperationError> {
        let r = self.annotate(f)?.optimise();
        filter_trace!(filter = %f, resolved = ?r, "filter resolved");
        Ok(r)
    }

    /// Resolve `f` and restrict it to a scope.
    #[instrument(level = "debug", name = "search::resolve_scoped", skip_all)]
    pub fn resolve_scoped(
        &self,
        f: &Filter,
        scope: ScopeAssertion,
    ) -> Result<FilterResolved, OperationError> {
        let scope_count = self.scope_count(&scope)?;
        let r = FilterResolved::And(
            vec![
                FilterResolved::Scope(scope, scope_count),
                self.annotate(f)?,
            ],
            scope_count,
        )
        .optimise();
        filter_trace!(filter = %f, resolved = ?r, "scoped filter resolved");
        Ok(r)
    }

    fn undefined(attr: &str, reason: &str) -> FilterResolved {
        filter_info!(?attr, %reason, "filter term is undefined");
        FilterResolved::Undefined(AttrString::from(attr))
    }

    fn entry_count(&self) -> Result<u64, OperationError> {
        self.store.count().map(|c| c as u64)
    }

    fn annotate(&self, f: &Filter) -> Result<FilterResolved, OperationError> {
        let schema = self.store.schema();
        let lookup = |a: &AttrString| schema.attribute_type(a.as_str());

        let r = match f {
            Filter::Eq(a, v) | Filter::Approx(a, v) => {
                let Some(at) = lookup(a) else {
                    return Ok(Self::undefined(a, "unknown attribute"));
                };
                let Ok(nv) = at.normalize(schema, v) else {
                    return Ok(Self::undefined(a, "invalid assertion value"));
                };
                let c = match self.store.value_index(at.name()) {
                    Some(idx) => idx.count_key(&nv)? as u64,
                    None => SCAN_COUNT_UNINDEXED,
                };
                if matches!(f, Filter::Eq(..)) {
                    FilterResolved::Eq(at, nv, c)
                } else {
                    FilterResolved::Approx(at, nv, c)
                }
            }
            Filter::Ge(a, v) | Filter::Le(a, v) => {
                let Some(at) = lookup(a) else {
                    return Ok(Self::undefined(a, "unknown attribute"));
                };
                let rule = at.ordering_or_equality();
                let Ok(nv) = rule.normalize(schema, v) else {
                    return Ok(Self::undefined(a, "invalid assertion value"));
                };
                let ge = matches!(f, Filter::Ge(..));
                let c = match self.store.value_index(at.name()) {
                    Some(idx) if rule.is_byte_ordered() => {
                        if ge {
                            idx.greater_than_count(&nv)? as u64
                        } else {
                            idx.less_than_count(&nv)? as u64
                        }
                    }
                    Some(idx) => idx.count()? as u64,
                    None => SCAN_COUNT_UNINDEXED,
                };
                if ge {
                    FilterResolved::Ge(at, nv, c)
                } else {
                    FilterResolved::Le(at, nv, c)
                }
            }
            Filter::Sub(a, s) => {
                let Some(at) = lookup(a) else {
                    return Ok(Self::undefined(a, "unknown attribute"));
                };
                let rule = at.substring_or_equality();
                let sm = match SubstringMatch::new(rule, schema, s) {
                    Ok(sm) => sm,
                    Err(OperationError::FilterParseError) => return Err(OperationError::FilterParseError),
                    Err(_) => return Ok(Self::undefined(a, "invalid assertion value")),
                };
                let c = match (self.store.value_index(at.name()), &sm.initial) {
                    (Some(idx), Some(initial)) if rule.is_byte_ordered() => {
                        idx.greater_than_count(initial)? as u64
                    }
                    (Some(idx), _) => idx.count()? as u64,
                    (None, _) => SCAN_COUNT_UNINDEXED,
                };
                FilterResolved::Sub(at, sm, c)
            }
            Filter::Pres(a) => {
                let Some(at) = lookup(a) else {
                    return Ok(Self::undefined(a, "unknown attribute"));
                };
                let c = if at.name() == ATTR_OBJECTCLASS {
                    self.entry_count()?
                } else if self.store.has_user_index(at.name()) {
                    self.store.presence_index().count_key(&at.oid)? as u64
                } else {
                    SCAN_COUNT_UNINDEXED
                };
                FilterResolved::Pres(at, c)
            }
            Filter::And(l) => {
                let l = l
                    .iter()
                    .map(|f| self.annotate(f))
                    .collect::<Result<Vec<_>, _>>()?;
                let c = match l.iter().map(|f| f.count()).min() {
                    Some(c) => c,
                    None => self.entry_count()?,
                };
                FilterResolved::And(l, c)
            }
            Filter::Or(l) => {
                let l = l
                    .iter()
                    .map(|f| self.annotate(f))
                    .collect::<Result<Vec<_>, _>>()?;
                let c = l.iter().fold(0u64, |acc, f| acc.saturating_add(f.count()));
                FilterResolved::Or(l, c)
            }
            Filter::Not(f) => {
                FilterResolved::Not(Box::new(self.annotate(f)?), SCAN_COUNT_UNINDEXED)
            }
        };
        Ok(r)
    }

    fn scope_count(&self, s: &ScopeAssertion) -> Result<u64, OperationError> {
        let store = self.store;
        let c = match s.scope {
            SearchScope::Base => 1,
            SearchScope::OneLevel => {
                let mut c = store.one_level_index().count_key(&s.base)?;
                if s.deref {
                    c += store.one_alias_index().count_key(&s.base)?;
                }
                c as u64
            }
            SearchScope::Subtree => {
                if !s.deref && store.context_id()? == Some(s.base) {
                    self.entry_count()?
                } else {
                    let mut c = store.sub_level_index().count_key(&s.base)?;
                    if s.deref {
                        c += store.sub_alias_index().count_key(&s.base)?;
                    }
                    c as u64
                }
            }
        };
        Ok(c)
    }
}
