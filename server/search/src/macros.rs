use std::sync::{Arc, OnceLock};

use uuid::Uuid;
use xdbm_partition::csn::CsnFactory;

use crate::prelude::*;

pub(crate) const SUFFIX: &str = "dc=example,dc=com";

fn csn() -> String {
    static CSNS: OnceLock<CsnFactory> = OnceLock::new();
    CSNS.get_or_init(|| CsnFactory::new(2)).new_csn().to_string()
}

pub(crate) fn test_entry(dn: &str, avas: &[(&str, &str)]) -> Entry {
    let mut e = Entry::new(Dn::parse(dn).expect("invalid test dn"))
        .with(ATTR_OBJECTCLASS, &[OC_TOP])
        .with(ATTR_ENTRYUUID, &[Uuid::new_v4().to_string().as_str()])
        .with(ATTR_ENTRYCSN, &[csn().as_str()]);
    for (a, v) in avas {
        e.add_value(a, v);
    }
    e
}

pub(crate) fn dn(s: &str) -> Dn {
    Dn::parse(s).expect("invalid test dn")
}

pub(crate) fn new_test_store() -> Store {
    let cfg = StoreConfig::new_test(SUFFIX)
        .with_index("cn")
        .with_index("ou")
        .with_index("uid")
        .with_index("uidNumber");
    Store::new(cfg, Arc::new(Schema::core())).expect("Failed to setup store")
}

/// The ids of the standard test tree.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Seeded {
    pub ctx: EntryId,
    pub people: EntryId,
    pub contractors: EntryId,
    pub groups: EntryId,
    pub alice: EntryId,
    pub bob: EntryId,
    pub carol: EntryId,
    pub dave: EntryId,
    pub admins: EntryId,
    pub dave_alias: EntryId,
}

/// dc=example,dc=com
///   ou=People: cn=Alice, cn=Bob, cn=Carol, cn=DaveAlias -> cn=Dave
///   ou=Contractors: cn=Dave
///   ou=groups: cn=admins
pub(crate) fn seed(store: &Store) -> Seeded {
    let add = |dn: &str, avas: &[(&str, &str)]| store.add(test_entry(dn, avas)).expect("add");
    let ctx = add(SUFFIX, &[("dc", "example")]);
    let people = add("ou=People,dc=example,dc=com", &[("ou", "People")]);
    let contractors = add("ou=Contractors,dc=example,dc=com", &[("ou", "Contractors")]);
    let groups = add("ou=groups,dc=example,dc=com", &[("ou", "groups")]);
    let alice = add(
        "cn=Alice,ou=People,dc=example,dc=com",
        &[
            ("cn", "Alice"),
            ("uid", "alice"),
            ("sn", "Smith"),
            ("uidNumber", "1000"),
            ("mail", "alice@example.com"),
        ],
    );
    let bob = add(
        "cn=Bob,ou=People,dc=example,dc=com",
        &[
            ("cn", "Bob"),
            ("uid", "bob"),
            ("sn", "Jones"),
            ("uidNumber", "1001"),
        ],
    );
    let carol = add(
        "cn=Carol,ou=People,dc=example,dc=com",
        &[
            ("cn", "Carol"),
            ("uid", "carol"),
            ("sn", "Smith"),
            ("uidNumber", "900"),
            ("description", "Team lead"),
        ],
    );
    let dave = add(
        "cn=Dave,ou=Contractors,dc=example,dc=com",
        &[
            ("cn", "Dave"),
            ("uid", "dave"),
            ("sn", "Smyth"),
            ("uidNumber", "20000"),
        ],
    );
    let admins = add(
        "cn=admins,ou=groups,dc=example,dc=com",
        &[
            ("cn", "admins"),
            ("member", "cn=Alice,ou=People,dc=example,dc=com"),
            ("member", "cn=Dave,ou=Contractors,dc=example,dc=com"),
        ],
    );
    let dave_alias = add(
        "cn=DaveAlias,ou=People,dc=example,dc=com",
        &[
            (ATTR_OBJECTCLASS, OC_ALIAS),
            ("cn", "DaveAlias"),
            ("aliasedObjectName", "cn=Dave,ou=Contractors,dc=example,dc=com"),
        ],
    );
    Seeded {
        ctx,
        people,
        contractors,
        groups,
        alice,
        bob,
        carol,
        dave,
        admins,
        dave_alias,
    }
}

/// The unscoped cursor of a filter.
pub(crate) fn filter_cursor<'a>(store: &'a Store, f: &Filter) -> CandidateCursor<'a> {
    let r = Optimiser::new(store).resolve(f).expect("resolve");
    CursorBuilder::new(store).build(&r).expect("build")
}

/// Drain a cursor forward from before the first candidate.
pub(crate) fn collect_ids(cursor: &mut dyn Cursor<Item = Candidate>) -> Vec<EntryId> {
    cursor.before_first().expect("before_first");
    CursorIter::new(cursor)
        .map(|r| r.expect("cursor failed").id())
        .collect()
}

/// Drain a cursor backward from after the last candidate.
pub(crate) fn collect_ids_rev(cursor: &mut dyn Cursor<Item = Candidate>) -> Vec<EntryId> {
    cursor.after_last().expect("after_last");
    let mut out = Vec::new();
    while cursor.previous().expect("previous") {
        out.push(cursor.get().expect("get").id());
    }
    out
}

pub(crate) fn sorted(mut ids: Vec<EntryId>) -> Vec<EntryId> {
    ids.sort();
    ids
}

macro_rules! run_search_test {
    ($test_fn:expr) => {{
        sketching::test_init();
        let store = $crate::macros::new_test_store();
        let ids = $crate::macros::seed(&store);
        let r = $test_fn(&store, &ids);
        // Searching never writes, but tests may mutate between searches.
        let v = store.verify();
        assert!(v.is_empty(), "{:?}", v);
        r
    }};
}
