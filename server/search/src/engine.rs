//! The search entry point: a base, a scope, an alias dereferencing mode and a
//! filter in, a cursor of matching candidates out.

use std::fmt;

use xdbm_partition::cursor::{EmptyCursor, SingletonCursor};

use crate::builder::{CursorBuilder, EvaluatorBuilder};
use crate::cursor::SizeLimitCursor;
use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchScope {
    /// Only the base entry.
    Base,
    /// The immediate children of the base.
    OneLevel,
    /// The base and every entry below it.
    #[default]
    Subtree,
}

impl fmt::Display for SearchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchScope::Base => write!(f, "base"),
            SearchScope::OneLevel => write!(f, "one"),
            SearchScope::Subtree => write!(f, "sub"),
        }
    }
}

/// When aliases are replaced by the entries they name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AliasDerefMode {
    #[default]
    Never,
    /// Aliases below the base.
    InSearching,
    /// The base entry itself.
    FindingBaseObj,
    Always,
}

impl AliasDerefMode {
    pub fn is_deref_in_searching(self) -> bool {
        matches!(self, AliasDerefMode::InSearching | AliasDerefMode::Always)
    }

    pub fn is_deref_finding_base(self) -> bool {
        matches!(self, AliasDerefMode::FindingBaseObj | AliasDerefMode::Always)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchControls {
    pub scope: SearchScope,
    /// Most candidates a cursor returns. 0 is no limit.
    pub size_limit: usize,
}

impl SearchControls {
    pub fn new(scope: SearchScope) -> Self {
        SearchControls {
            scope,
            size_limit: 0,
        }
    }

    pub fn with_size_limit(mut self, size_limit: usize) -> Self {
        self.size_limit = size_limit;
        self
    }
}

pub struct SearchEngine<'a> {
    store: &'a Store,
}

impl<'a> SearchEngine<'a> {
    pub fn new(store: &'a Store) -> Self {
        SearchEngine { store }
    }

    pub fn store(&self) -> &'a Store {
        self.store
    }

    /// The id the search starts from: the base, or the entry it names when
    /// the base is an alias and `deref` says to follow it.
    fn find_base(&self, base: &Dn, deref: AliasDerefMode) -> Result<EntryId, OperationError> {
        let id = self.store.get_entry_id(base)?.ok_or_else(|| {
            request_info!(%base, "search base does not exist");
            OperationError::NoSuchObject(base.to_string())
        })?;

        if !deref.is_deref_finding_base() || !self.store.is_alias(id)? {
            return Ok(id);
        }

        let target = self.store.alias_index().reverse_lookup(id)?.ok_or_else(|| {
            request_error!(%base, %id, "alias entry missing from the alias index");
            OperationError::CorruptedIndex(SYS_IDX_ALIAS.to_string())
        })?;
        let target_dn = Dn::parse(&target)?;
        match self.store.get_entry_id(&target_dn)? {
            Some(t) => {
                request_trace!(%base, %target, "search base dereferenced");
                Ok(t)
            }
            None => {
                request_error!(%base, %target, "search base is an alias to a missing entry");
                Err(OperationError::AliasProblem(target))
            }
        }
    }

    /// A cursor over the ids of the entries within the scope of `base` that
    /// match `filter`.
    #[instrument(level = "debug", name = "search::cursor", skip_all)]
    pub fn cursor(
        &self,
        base: &Dn,
        deref: AliasDerefMode,
        filter: &Filter,
        controls: &SearchControls,
    ) -> Result<CandidateCursor<'a>, OperationError> {
        request_info!(%base, %filter, ?deref, scope = %controls.scope, size_limit = controls.size_limit, "search");
        let base_id = self.find_base(base, deref)?;
        let optimiser = Optimiser::new(self.store);

        let cursor: CandidateCursor<'a> = if controls.scope == SearchScope::Base {
            let resolved = optimiser.resolve(filter)?;
            let evaluator = EvaluatorBuilder::new(self.store).build(&resolved)?;
            if evaluator.evaluate_id(base_id)? {
                Box::new(SingletonCursor::new(Candidate::forward(
                    IndexKey::Id(base_id),
                    base_id,
                )))
            } else {
                Box::new(EmptyCursor::<Candidate>::new())
            }
        } else {
            let scope = ScopeAssertion {
                scope: controls.scope,
                base: base_id,
                deref: deref.is_deref_in_searching(),
            };
            let resolved = optimiser.resolve_scoped(filter, scope)?;
            filter_info!(resolved = ?resolved, "search plan");
            CursorBuilder::new(self.store).build(&resolved)?
        };

        Ok(Box::new(SizeLimitCursor::new(cursor, controls.size_limit)))
    }

    /// A test of single entries against `filter`, without any scope.
    pub fn evaluator(&self, filter: &Filter) -> Result<Box<dyn Evaluator + 'a>, OperationError> {
        let resolved = Optimiser::new(self.store).resolve(filter)?;
        EvaluatorBuilder::new(self.store).build(&resolved)
    }

    /// Run a search to completion and look up every matching entry.
    pub fn search(
        &self,
        base: &Dn,
        deref: AliasDerefMode,
        filter: &Filter,
        controls: &SearchControls,
    ) -> Result<Vec<Entry>, OperationError> {
        let mut cursor = self.cursor(base, deref, filter, controls)?;
        let mut entries = Vec::new();
        cursor.before_first()?;
        while cursor.next()? {
            let id = cursor.get()?.id();
            // Skip entries deleted since the cursor produced them.
            if let Some(e) = self.store.lookup(id)? {
                entries.push(e);
            }
        }
        cursor.close()?;
        request_info!(count = entries.len(), "search complete");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use crate::macros::*;
    use crate::prelude::*;

    fn run(
        store: &Store,
        base: &str,
        deref: AliasDerefMode,
        f: Filter,
        scope: SearchScope,
    ) -> Result<Vec<EntryId>, OperationError> {
        let engine = SearchEngine::new(store);
        let mut c = engine.cursor(&dn(base), deref, &f, &SearchControls::new(scope))?;
        Ok(collect_ids(&mut c))
    }

    #[test]
    fn test_engine_scopes() {
        run_search_test!(|store: &Store, ids: &Seeded| {
            let people = "ou=People,dc=example,dc=com";
            let never = AliasDerefMode::Never;

            assert_eq!(
                run(store, people, never, f_pres("objectClass"), SearchScope::Base),
                Ok(vec![ids.people])
            );
            assert_eq!(
                run(store, people, never, f_pres("uid"), SearchScope::Base),
                Ok(vec![])
            );
            assert_eq!(
                run(store, people, never, f_pres("uid"), SearchScope::OneLevel),
                Ok(vec![ids.alice, ids.bob, ids.carol])
            );
            assert_eq!(
                run(store, SUFFIX, never, f_pres("uid"), SearchScope::OneLevel),
                Ok(vec![])
            );
            assert_eq!(
                run(store, SUFFIX, never, f_eq("sn", "smith"), SearchScope::Subtree),
                Ok(vec![ids.alice, ids.carol])
            );
            assert_eq!(
                run(store, "ou=Contractors,dc=example,dc=com", never, f_pres("uid"), SearchScope::Subtree),
                Ok(vec![ids.dave])
            );
        })
    }

    #[test]
    fn test_engine_deref_in_searching() {
        run_search_test!(|store: &Store, ids: &Seeded| {
            let people = "ou=People,dc=example,dc=com";
            let f = f_pres("objectClass");

            let found = run(store, people, AliasDerefMode::Never, f.clone(), SearchScope::OneLevel)
                .expect("search");
            assert_eq!(found, vec![ids.alice, ids.bob, ids.carol, ids.dave_alias]);

            for mode in [AliasDerefMode::InSearching, AliasDerefMode::Always] {
                let found = run(store, people, mode, f.clone(), SearchScope::Subtree).expect("search");
                assert_eq!(
                    sorted(found),
                    vec![ids.people, ids.alice, ids.bob, ids.carol, ids.dave]
                );
            }

            // Only the target's own attributes are tested.
            let found = run(
                store,
                people,
                AliasDerefMode::InSearching,
                f_eq("uid", "dave"),
                SearchScope::OneLevel,
            )
            .expect("search");
            assert_eq!(found, vec![ids.dave]);
        })
    }

    #[test]
    fn test_engine_deref_finding_base() {
        run_search_test!(|store: &Store, ids: &Seeded| {
            let alias = "cn=DaveAlias,ou=People,dc=example,dc=com";
            let f = f_pres("objectClass");

            assert_eq!(
                run(store, alias, AliasDerefMode::Never, f.clone(), SearchScope::Base),
                Ok(vec![ids.dave_alias])
            );
            assert_eq!(
                run(store, alias, AliasDerefMode::FindingBaseObj, f.clone(), SearchScope::Base),
                Ok(vec![ids.dave])
            );
            assert_eq!(
                run(store, alias, AliasDerefMode::Always, f, SearchScope::Subtree),
                Ok(vec![ids.dave])
            );
        })
    }

    #[test]
    fn test_engine_missing_base() {
        run_search_test!(|store: &Store, _ids: &Seeded| {
            assert_eq!(
                run(
                    store,
                    "ou=Nowhere,dc=example,dc=com",
                    AliasDerefMode::Never,
                    f_pres("objectClass"),
                    SearchScope::Subtree
                ),
                Err(OperationError::NoSuchObject("ou=Nowhere,dc=example,dc=com".to_string()))
            );
            assert_eq!(
                run(store, "dc=other", AliasDerefMode::Never, f_pres("objectClass"), SearchScope::Base),
                Err(OperationError::NoSuchObject("dc=other".to_string()))
            );
        })
    }

    #[test]
    fn test_engine_size_limit() {
        run_search_test!(|store: &Store, ids: &Seeded| {
            let engine = SearchEngine::new(store);
            let controls = SearchControls::new(SearchScope::Subtree).with_size_limit(2);
            let mut c = engine
                .cursor(&dn(SUFFIX), AliasDerefMode::Never, &f_pres("uid"), &controls)
                .expect("cursor");
            c.before_first().expect("before_first");
            assert_eq!(c.next(), Ok(true));
            assert_eq!(c.next(), Ok(true));
            assert_eq!(c.next(), Err(OperationError::SizeLimitExceeded));

            let controls = SearchControls::new(SearchScope::OneLevel).with_size_limit(3);
            let r = engine.search(
                &dn("ou=groups,dc=example,dc=com"),
                AliasDerefMode::Never,
                &f_pres("objectClass"),
                &controls,
            );
            assert_eq!(r.map(|v| v.iter().map(|e| e.id()).collect::<Vec<_>>()), Ok(vec![Some(ids.admins)]));
        })
    }

    #[test]
    fn test_engine_search_returns_named_entries() {
        run_search_test!(|store: &Store, _ids: &Seeded| {
            let engine = SearchEngine::new(store);
            let f = Filter::from_ldap_str("(&(objectClass=top)(|(sn=jones)(uid=car*)))").expect("parse");
            let found = engine
                .search(&dn(SUFFIX), AliasDerefMode::Never, &f, &SearchControls::default())
                .expect("search");
            let mut names: Vec<String> = found.iter().map(|e| e.dn().to_string()).collect();
            names.sort();
            assert_eq!(
                names,
                vec![
                    "cn=Bob,ou=People,dc=example,dc=com".to_string(),
                    "cn=Carol,ou=People,dc=example,dc=com".to_string()
                ]
            );
        })
    }

    #[test]
    fn test_engine_evaluator() {
        run_search_test!(|store: &Store, ids: &Seeded| {
            let engine = SearchEngine::new(store);
            let e = engine
                .evaluator(&f_and(vec![f_eq("sn", "smith"), f_le("uidNumber", "950")]))
                .expect("evaluator");
            assert_eq!(e.evaluate_id(ids.carol), Ok(true));
            assert_eq!(e.evaluate_id(ids.alice), Ok(false));

            let alice = store.lookup(ids.alice).expect("lookup").expect("alice");
            let e = engine.evaluator(&f_eq("mail", "ALICE@example.com")).expect("evaluator");
            assert_eq!(e.evaluate_entry(&alice), Ok(true));
        })
    }
}
