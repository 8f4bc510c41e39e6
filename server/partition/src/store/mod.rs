//! The entry store of one partition.
//!
//! A [`Store`] owns the master table, the system indices and the configured
//! user indices, all in one database. It is the only writer of any of them,
//! and keeps every index consistent with the master table across add,
//! modify, rename, move and delete.
//!
//! Writers are serialised by an operation level lock. Readers take no lock
//! and observe the indices as left by the last completed write.
//!
//! There is no rollback. Every validation that can be done up front is done
//! before the first index write, but a failure of the backing store part way
//! through a mutation can leave some index tuples written. `verify` reports
//! such damage.

mod alias;
mod mutate;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use hashbrown::HashMap;

use crate::be::index::{IndexBuilder, IndexCursor};
use crate::be::master::MasterTable;
use crate::be::Db;
use crate::cursor::AllEntriesCursor;
use crate::prelude::*;
use crate::rdn::ParentIdAndRdn;

/// A borrowed system index, by key type.
#[derive(Debug, Clone, Copy)]
pub enum SystemIndex<'a> {
    Id(&'a Index<EntryId>),
    Value(&'a Index<String>),
    Rdn(&'a Index<ParentIdAndRdn>),
}

impl<'a> SystemIndex<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            SystemIndex::Id(i) => i.name(),
            SystemIndex::Value(i) => i.name(),
            SystemIndex::Rdn(i) => i.name(),
        }
    }
}

pub struct Store {
    cfg: StoreConfig,
    db: Db,
    schema: Arc<dyn SchemaView>,
    suffix: Dn,
    master: MasterTable,
    // attribute oid -> ids holding at least one value, for user indexed
    // attributes.
    presence: Index<String>,
    // parent -> child
    one_level: Index<EntryId>,
    // ancestor -> descendant, reflexive, never keyed by ROOT.
    sub_level: Index<EntryId>,
    rdn: Index<ParentIdAndRdn>,
    // normalised target dn -> alias
    alias: Index<String>,
    // alias parent -> target
    one_alias: Index<EntryId>,
    // alias ancestor below the context entry -> target
    sub_alias: Index<EntryId>,
    objectclass: Index<String>,
    entry_uuid: Index<String>,
    entry_csn: Index<String>,
    user_indices: HashMap<AttrString, Index<String>>,
    write_lock: Mutex<()>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("suffix", &self.suffix.up_name())
            .field("path", &self.db.path())
            .field("user_indices", &self.user_indices.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Store {
    /// Open or create the partition described by `cfg`. Index configuration
    /// is fixed from here on.
    #[instrument(level = "debug", name = "store::new", skip_all)]
    pub fn new(cfg: StoreConfig, schema: Arc<dyn SchemaView>) -> Result<Self, OperationError> {
        let suffix = Dn::parse(&cfg.suffix)?.normalize(schema.as_ref())?;
        if suffix.is_root() {
            admin_error!("a partition suffix may not be empty");
            return Err(OperationError::InvalidDnSyntax(cfg.suffix.clone()));
        }

        let db = Db::open(&cfg.path)?;
        let master = MasterTable::open(&db, cfg.cache_size)?;

        let presence = IndexBuilder::new(SYS_IDX_PRESENCE).build(&db)?;
        let one_level = IndexBuilder::new(SYS_IDX_ONE_LEVEL)
            .single_valued()
            .build(&db)?;
        let sub_level = IndexBuilder::new(SYS_IDX_SUB_LEVEL).build(&db)?;
        let rdn = IndexBuilder::new(SYS_IDX_RDN)
            .unique()
            .single_valued()
            .build(&db)?;
        let alias = IndexBuilder::new(SYS_IDX_ALIAS).build(&db)?;
        let one_alias = IndexBuilder::new(SYS_IDX_ONE_ALIAS).build(&db)?;
        let sub_alias = IndexBuilder::new(SYS_IDX_SUB_ALIAS).build(&db)?;
        let objectclass = IndexBuilder::new(ATTR_OBJECTCLASS).build(&db)?;
        let entry_uuid = IndexBuilder::new(ATTR_ENTRYUUID).build(&db)?;
        let entry_csn = IndexBuilder::new(ATTR_ENTRYCSN).build(&db)?;

        let mut user_indices = HashMap::with_capacity(cfg.indexes.len());
        for ic in cfg.indexes.iter() {
            let at = schema.resolve(&ic.attribute)?;
            let name = at.name();
            if SYSTEM_INDICES.contains(&name) {
                admin_warn!(attr = %name, "attribute already has a system index, ignoring user index");
                continue;
            }
            if user_indices.contains_key(name) {
                admin_warn!(attr = %name, "duplicate user index configuration");
                continue;
            }
            let idx = IndexBuilder::new(name)
                .cache_size(ic.cache_size)
                .build(&db)?;
            user_indices.insert(AttrString::from(name), idx);
        }

        // Table creation happened inside the open transaction.
        db.sync()?;

        admin_info!(
            suffix = %suffix,
            path = %db.path(),
            user_indices = user_indices.len(),
            "partition store opened"
        );

        Ok(Store {
            cfg,
            db,
            schema,
            suffix,
            master,
            presence,
            one_level,
            sub_level,
            rdn,
            alias,
            one_alias,
            sub_alias,
            objectclass,
            entry_uuid,
            entry_csn,
            user_indices,
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.cfg
    }

    /// The normalised suffix.
    pub fn suffix(&self) -> &Dn {
        &self.suffix
    }

    pub fn schema(&self) -> &dyn SchemaView {
        self.schema.as_ref()
    }

    pub fn schema_ref(&self) -> Arc<dyn SchemaView> {
        self.schema.clone()
    }

    fn check_open(&self) -> Result<(), OperationError> {
        if self.closed.load(Ordering::Acquire) {
            admin_error!("store has been destroyed");
            Err(OperationError::InvalidState)
        } else {
            Ok(())
        }
    }

    fn write_guard(&self) -> Result<MutexGuard<'_, ()>, OperationError> {
        self.check_open()?;
        self.write_lock.lock().map_err(|_| {
            admin_error!("store write lock is poisoned");
            OperationError::BackendEngine
        })
    }

    fn sync_on_write(&self) -> Result<(), OperationError> {
        if self.cfg.sync_on_write {
            self.db.sync()
        } else {
            Ok(())
        }
    }

    pub fn normalize_dn(&self, dn: &Dn) -> Result<Dn, OperationError> {
        if dn.is_normalized() {
            Ok(dn.clone())
        } else {
            dn.normalize(self.schema.as_ref())
        }
    }

    // ===== name resolution =====

    /// The id of the context entry, once it has been added.
    pub fn context_id(&self) -> Result<Option<EntryId>, OperationError> {
        self.rdn.forward_lookup(&ParentIdAndRdn::new(
            EntryId::ROOT,
            self.suffix.rdns().to_vec(),
        ))
    }

    /// Resolve a name by walking the rdn index down from the context entry.
    pub fn get_entry_id(&self, dn: &Dn) -> Result<Option<EntryId>, OperationError> {
        let ndn = self.normalize_dn(dn)?;
        let Some(relative) = ndn.relative_to(&self.suffix) else {
            return Ok(None);
        };
        let Some(mut id) = self.context_id()? else {
            return Ok(None);
        };
        for rdn in relative.iter().rev() {
            match self
                .rdn
                .forward_lookup(&ParentIdAndRdn::single(id, rdn.clone()))?
            {
                Some(child) => id = child,
                None => return Ok(None),
            }
        }
        Ok(Some(id))
    }

    /// Rebuild the name of an entry from its parent links.
    pub fn get_entry_dn(&self, id: EntryId) -> Result<Dn, OperationError> {
        let mut rdns = Vec::new();
        let mut cur = id;
        loop {
            let key = self.rdn.reverse_lookup(cur)?.ok_or_else(|| {
                if cur == id {
                    OperationError::NoSuchObject(id.to_string())
                } else {
                    admin_error!(%id, missing = %cur, "broken parent chain in rdn index");
                    OperationError::CorruptedIndex(SYS_IDX_RDN.to_string())
                }
            })?;
            rdns.extend(key.rdns().iter().cloned());
            if key.parent_id().is_root() {
                break;
            }
            cur = key.parent_id();
        }
        Ok(Dn::from_rdns(rdns))
    }

    /// The parent of an entry. The context entry's parent is
    /// [`EntryId::ROOT`].
    pub fn get_parent_id(&self, id: EntryId) -> Result<Option<EntryId>, OperationError> {
        Ok(self.rdn.reverse_lookup(id)?.map(|k| k.parent_id()))
    }

    /// `from` and each of its ancestors, nearest first, ending at the context
    /// entry.
    fn ancestors(&self, from: EntryId) -> Result<Vec<EntryId>, OperationError> {
        let mut out = Vec::new();
        let mut cur = from;
        while !cur.is_root() {
            out.push(cur);
            cur = self.get_parent_id(cur)?.ok_or_else(|| {
                admin_error!(id = %cur, "entry missing from rdn index");
                OperationError::CorruptedIndex(SYS_IDX_RDN.to_string())
            })?;
        }
        Ok(out)
    }

    // ===== reads =====

    /// An entry with its name attached.
    pub fn lookup(&self, id: EntryId) -> Result<Option<Entry>, OperationError> {
        self.check_open()?;
        let Some(e) = self.master.get(id)? else {
            return Ok(None);
        };
        let mut e = (*e).clone();
        e.set_dn(self.get_entry_dn(id)?);
        Ok(Some(e))
    }

    pub fn lookup_dn(&self, dn: &Dn) -> Result<Option<Entry>, OperationError> {
        match self.get_entry_id(dn)? {
            Some(id) => self.lookup(id),
            None => Ok(None),
        }
    }

    /// The stored entry without its name, shared with the entry cache.
    pub fn get_entry(&self, id: EntryId) -> Result<Option<Arc<Entry>>, OperationError> {
        self.check_open()?;
        self.master.get(id)
    }

    /// The children of `id`, in id order.
    pub fn list(&self, id: EntryId) -> IndexCursor<EntryId> {
        self.one_level.forward_cursor_key(&id)
    }

    pub fn child_count(&self, id: EntryId) -> Result<usize, OperationError> {
        self.one_level.count_key(&id)
    }

    pub fn all_entries(&self) -> AllEntriesCursor {
        AllEntriesCursor::new(self.master.cursor())
    }

    pub fn count(&self) -> Result<usize, OperationError> {
        self.check_open()?;
        self.master.count()
    }

    pub fn is_alias(&self, id: EntryId) -> Result<bool, OperationError> {
        self.alias.reverse_key(id)
    }

    // ===== index access =====

    /// The user index on an attribute, by any of its names.
    pub fn user_index(&self, attr: &str) -> Result<&Index<String>, OperationError> {
        self.schema
            .attribute_type(attr)
            .and_then(|at| self.user_indices.get(at.name()))
            .ok_or_else(|| OperationError::IndexNotFound(attr.to_string()))
    }

    pub fn has_user_index(&self, attr: &str) -> bool {
        self.user_index(attr).is_ok()
    }

    pub fn user_indices(&self) -> impl Iterator<Item = (&str, &Index<String>)> {
        self.user_indices.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn system_index(&self, name: &str) -> Result<SystemIndex<'_>, OperationError> {
        let idx = match name.to_lowercase().as_str() {
            SYS_IDX_PRESENCE => SystemIndex::Value(&self.presence),
            SYS_IDX_ONE_LEVEL => SystemIndex::Id(&self.one_level),
            SYS_IDX_SUB_LEVEL => SystemIndex::Id(&self.sub_level),
            SYS_IDX_RDN => SystemIndex::Rdn(&self.rdn),
            SYS_IDX_ALIAS => SystemIndex::Value(&self.alias),
            SYS_IDX_ONE_ALIAS => SystemIndex::Id(&self.one_alias),
            SYS_IDX_SUB_ALIAS => SystemIndex::Id(&self.sub_alias),
            ATTR_OBJECTCLASS => SystemIndex::Value(&self.objectclass),
            ATTR_ENTRYUUID => SystemIndex::Value(&self.entry_uuid),
            ATTR_ENTRYCSN => SystemIndex::Value(&self.entry_csn),
            _ => return Err(OperationError::IndexNotFound(name.to_string())),
        };
        Ok(idx)
    }

    /// The value index maintained for a canonical attribute name, system or
    /// user.
    pub fn value_index(&self, name: &str) -> Option<&Index<String>> {
        match name {
            ATTR_OBJECTCLASS => Some(&self.objectclass),
            ATTR_ENTRYUUID => Some(&self.entry_uuid),
            ATTR_ENTRYCSN => Some(&self.entry_csn),
            _ => self.user_indices.get(name),
        }
    }

    pub fn presence_index(&self) -> &Index<String> {
        &self.presence
    }

    pub fn one_level_index(&self) -> &Index<EntryId> {
        &self.one_level
    }

    pub fn sub_level_index(&self) -> &Index<EntryId> {
        &self.sub_level
    }

    pub fn rdn_index(&self) -> &Index<ParentIdAndRdn> {
        &self.rdn
    }

    pub fn alias_index(&self) -> &Index<String> {
        &self.alias
    }

    pub fn one_alias_index(&self) -> &Index<EntryId> {
        &self.one_alias
    }

    pub fn sub_alias_index(&self) -> &Index<EntryId> {
        &self.sub_alias
    }

    pub fn objectclass_index(&self) -> &Index<String> {
        &self.objectclass
    }

    pub fn entry_uuid_index(&self) -> &Index<String> {
        &self.entry_uuid
    }

    pub fn entry_csn_index(&self) -> &Index<String> {
        &self.entry_csn
    }

    fn value_indices(&self) -> impl Iterator<Item = &Index<String>> {
        [
            &self.presence,
            &self.alias,
            &self.objectclass,
            &self.entry_uuid,
            &self.entry_csn,
        ]
        .into_iter()
        .chain(self.user_indices.values())
    }

    fn id_indices(&self) -> [&Index<EntryId>; 4] {
        [
            &self.one_level,
            &self.sub_level,
            &self.one_alias,
            &self.sub_alias,
        ]
    }

    // ===== lifecycle =====

    /// Make every completed write durable.
    pub fn sync(&self) -> Result<(), OperationError> {
        let _guard = self.write_guard()?;
        self.db.sync()
    }

    /// Close every index and the master table. Every failure is collected
    /// rather than stopping at the first.
    #[instrument(level = "debug", name = "store::destroy", skip_all)]
    pub fn destroy(&self) -> Result<(), OperationError> {
        let _guard = self.write_guard()?;
        self.closed.store(true, Ordering::Release);

        let mut errs = Vec::new();
        for idx in self.value_indices() {
            if let Err(e) = idx.close() {
                admin_error!(?e, index = %idx.name(), "failed to close index");
                errs.push(e);
            }
        }
        for idx in self.id_indices() {
            if let Err(e) = idx.close() {
                admin_error!(?e, index = %idx.name(), "failed to close index");
                errs.push(e);
            }
        }
        if let Err(e) = self.rdn.close() {
            admin_error!(?e, index = %self.rdn.name(), "failed to close index");
            errs.push(e);
        }
        if let Err(e) = self.master.close() {
            admin_error!(?e, "failed to close master table");
            errs.push(e);
        }
        if let Err(e) = self.db.close() {
            admin_error!(?e, "failed to close database");
            errs.push(e);
        }

        if errs.is_empty() {
            admin_info!(suffix = %self.suffix, "partition store closed");
            Ok(())
        } else {
            Err(OperationError::DestroyFailed(errs))
        }
    }

    /// Check the store against its own invariants. An empty result means
    /// nothing was found.
    #[instrument(level = "debug", name = "store::verify", skip_all)]
    pub fn verify(&self) -> Vec<Result<(), ConsistencyError>> {
        let mut results = Vec::new();

        let mut record = |r: Result<Vec<ConsistencyError>, OperationError>| match r {
            Ok(errs) => results.extend(errs.into_iter().map(Err)),
            Err(e) => {
                admin_error!(?e, "unable to verify store");
                results.push(Err(ConsistencyError::Unknown));
            }
        };

        for idx in self.value_indices() {
            record(idx.verify());
        }
        for idx in self.id_indices() {
            record(idx.verify());
        }
        record(self.rdn.verify());
        record(self.verify_hierarchy());

        results
    }

    fn verify_hierarchy(&self) -> Result<Vec<ConsistencyError>, OperationError> {
        let mut errs = Vec::new();
        let mut highest = 0;

        let mut entries = self.master.cursor();
        while entries.next()? {
            let id = entries.get_key()?;
            highest = highest.max(id.as_u64());
            match self.rdn.reverse_lookup(id)? {
                Some(key) => {
                    if self.one_level.reverse_lookup(id)? != Some(key.parent_id()) {
                        admin_warn!(%id, "one level parent disagrees with rdn index");
                        errs.push(ConsistencyError::OneLevelParentMismatch(id.as_u64()));
                    }
                }
                None => {
                    admin_warn!(%id, "entry has no rdn index tuple");
                    errs.push(ConsistencyError::RdnIndexMissing(id.as_u64()));
                }
            }
            if !self.sub_level.forward(&id, id)? {
                admin_warn!(%id, "entry is missing its reflexive sub level tuple");
                errs.push(ConsistencyError::SubLevelReflexiveMissing(id.as_u64()));
            }
        }

        let mut names = self.rdn.reverse_cursor();
        while names.next()? {
            let id = names.get()?.id();
            if self.master.get(id)?.is_none() {
                admin_warn!(%id, "rdn index names an entry that does not exist");
                errs.push(ConsistencyError::RdnIndexOrphaned(id.as_u64()));
            }
        }

        if self.master.current_id() < highest {
            admin_warn!(highest, current = self.master.current_id(), "id sequence is behind");
            errs.push(ConsistencyError::EntryIdSequenceBehind(highest));
        }

        Ok(errs)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, OnceLock};

    use uuid::Uuid;

    use crate::csn::CsnFactory;
    use crate::prelude::*;
    use crate::store::SystemIndex;

    pub(crate) const SUFFIX: &str = "dc=example,dc=com";

    fn csn() -> String {
        static CSNS: OnceLock<CsnFactory> = OnceLock::new();
        CSNS.get_or_init(|| CsnFactory::new(1)).new_csn().to_string()
    }

    /// An entry carrying the attributes every stored entry needs.
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

    pub(crate) fn test_alias(dn: &str, target: &str) -> Entry {
        test_entry(dn, &[(ATTR_OBJECTCLASS, OC_ALIAS), ("aliasedObjectName", target)])
    }

    pub(crate) fn dn(s: &str) -> Dn {
        Dn::parse(s).expect("invalid test dn")
    }

    pub(crate) fn new_test_store() -> Store {
        let cfg = StoreConfig::new_test(SUFFIX)
            .with_index("cn")
            .with_index("ou")
            .with_index("uid");
        Store::new(cfg, Arc::new(Schema::core())).expect("Failed to setup store")
    }

    macro_rules! run_test {
        ($test_fn:expr) => {{
            sketching::test_init();
            let store = new_test_store();
            let r = $test_fn(&store);
            // Whatever the test did, the indices must still agree.
            let v = store.verify();
            assert!(v.is_empty(), "{:?}", v);
            r
        }};
    }
    pub(crate) use run_test;

    /// dc=example,dc=com
    ///   ou=people: cn=alice, cn=bob
    ///   ou=groups
    pub(crate) fn seed(store: &Store) -> [EntryId; 5] {
        let ctx = store
            .add(test_entry(SUFFIX, &[("dc", "example")]))
            .expect("add context");
        let people = store
            .add(test_entry("ou=People,dc=example,dc=com", &[("ou", "People")]))
            .expect("add people");
        let groups = store
            .add(test_entry("ou=groups,dc=example,dc=com", &[("ou", "groups")]))
            .expect("add groups");
        let alice = store
            .add(test_entry(
                "cn=Alice,ou=People,dc=example,dc=com",
                &[("cn", "Alice"), ("uid", "alice"), ("sn", "Smith")],
            ))
            .expect("add alice");
        let bob = store
            .add(test_entry(
                "cn=Bob,ou=People,dc=example,dc=com",
                &[("cn", "Bob"), ("uid", "bob"), ("sn", "Jones")],
            ))
            .expect("add bob");
        [ctx, people, groups, alice, bob]
    }

    fn cn_oid() -> String {
        Schema::core()
            .attribute_type("cn")
            .map(|a| a.oid.clone())
            .expect("cn in core schema")
    }

    #[test]
    fn test_store_add_and_lookup() {
        run_test!(|store: &Store| {
            let [ctx, people, _groups, alice, _bob] = seed(store);
            assert_eq!(ctx, EntryId::new(1));
            assert_eq!(store.count(), Ok(5));
            assert_eq!(store.context_id(), Ok(Some(ctx)));

            // Names resolve regardless of case, spacing or attribute alias.
            assert_eq!(
                store.get_entry_id(&dn("commonName=alice,OU=people,DC=Example,dc=com")),
                Ok(Some(alice))
            );
            assert_eq!(store.get_entry_id(&dn("cn=carol,ou=people,dc=example,dc=com")), Ok(None));
            assert_eq!(store.get_entry_id(&dn("dc=other,dc=com")), Ok(None));

            let e = store.lookup(alice).expect("lookup").expect("present");
            assert_eq!(e.dn().up_name(), "cn=Alice,ou=People,dc=example,dc=com");
            assert_eq!(e.id(), Some(alice));
            assert_eq!(e.get_single(ATTR_ENTRYPARENTID), Some(people.to_string().as_str()));

            assert_eq!(store.get_parent_id(alice), Ok(Some(people)));
            assert_eq!(store.get_parent_id(ctx), Ok(Some(EntryId::ROOT)));
            assert_eq!(store.lookup(EntryId::new(99)), Ok(None));
            assert_eq!(
                store.get_entry_dn(EntryId::new(99)),
                Err(OperationError::NoSuchObject("99".to_string()))
            );
        })
    }

    #[test]
    fn test_store_add_rejections() {
        run_test!(|store: &Store| {
            // Nothing can be added before the context entry.
            assert_eq!(
                store.add(test_entry("ou=people,dc=example,dc=com", &[])),
                Err(OperationError::NoSuchObject(SUFFIX.to_string()))
            );
            seed(store);
            let before = store.count().expect("count");

            assert_eq!(
                store.add(test_entry("CN=alice,ou=people,dc=example,dc=com", &[])),
                Err(OperationError::AlreadyExists(
                    "CN=alice,ou=people,dc=example,dc=com".to_string()
                ))
            );
            assert_eq!(
                store.add(test_entry("cn=x,ou=missing,dc=example,dc=com", &[])),
                Err(OperationError::NoSuchObject(
                    "ou=missing,dc=example,dc=com".to_string()
                ))
            );
            assert_eq!(
                store.add(test_entry("cn=x,dc=other,dc=org", &[])),
                Err(OperationError::NoSuchObject("cn=x,dc=other,dc=org".to_string()))
            );

            let mut e = test_entry("cn=x,dc=example,dc=com", &[]);
            e.remove(ATTR_ENTRYCSN);
            assert_eq!(
                store.add(e),
                Err(OperationError::SchemaViolation(
                    SchemaError::MissingMustAttribute(vec![ATTR_ENTRYCSN.to_string()])
                ))
            );
            let mut e = test_entry("cn=x,dc=example,dc=com", &[]);
            e.remove(ATTR_ENTRYCSN);
            e.remove(ATTR_ENTRYUUID);
            assert_eq!(
                store.add(e),
                Err(OperationError::SchemaViolation(
                    SchemaError::MissingMustAttribute(vec![
                        ATTR_ENTRYCSN.to_string(),
                        ATTR_ENTRYUUID.to_string()
                    ])
                ))
            );
            let mut e = test_entry("cn=x,dc=example,dc=com", &[]);
            e.remove(ATTR_OBJECTCLASS);
            assert_eq!(
                store.add(e),
                Err(OperationError::SchemaViolation(SchemaError::NoClassFound))
            );
            assert_eq!(
                store.add(test_entry("cn=x,dc=example,dc=com", &[("bogusattr", "1")])),
                Err(OperationError::InvalidAttributeName("bogusattr".to_string()))
            );
            assert_eq!(
                store.add(test_entry("cn=x,dc=example,dc=com", &[("uidNumber", "abc")])),
                Err(OperationError::SchemaViolation(
                    SchemaError::InvalidAttributeSyntax("abc".to_string())
                ))
            );

            // Failed adds leave nothing behind.
            assert_eq!(store.count(), Ok(before));
        })
    }

    #[test]
    fn test_store_sub_level_closure() {
        run_test!(|store: &Store| {
            let [ctx, people, groups, alice, _bob] = seed(store);
            let sub = store.sub_level_index();
            assert_eq!(sub.forward(&alice, alice), Ok(true));
            assert_eq!(sub.forward(&people, alice), Ok(true));
            assert_eq!(sub.forward(&ctx, alice), Ok(true));
            assert_eq!(sub.forward(&EntryId::ROOT, alice), Ok(false));
            assert_eq!(sub.forward(&groups, alice), Ok(false));
            assert_eq!(sub.forward(&ctx, ctx), Ok(true));
            assert_eq!(sub.count_key(&ctx), Ok(5));

            let one = store.one_level_index();
            assert_eq!(one.forward(&people, alice), Ok(true));
            assert_eq!(one.forward(&ctx, alice), Ok(false));
            assert_eq!(one.forward(&EntryId::ROOT, ctx), Ok(true));
        })
    }

    #[test]
    fn test_store_delete_is_inverse_of_add() {
        run_test!(|store: &Store| {
            let [ctx, people, _groups, _alice, _bob] = seed(store);
            let before = store.count().expect("count");

            let carol = store
                .add(test_entry(
                    "cn=carol,ou=people,dc=example,dc=com",
                    &[("cn", "carol"), ("uid", "carol")],
                ))
                .expect("add");
            assert_eq!(store.count(), Ok(before + 1));
            assert_eq!(store.user_index("cn").and_then(|i| i.forward(&"carol".to_string(), carol)), Ok(true));
            assert_eq!(store.presence_index().forward(&cn_oid(), carol), Ok(true));

            store.delete(carol).expect("delete");
            assert_eq!(store.count(), Ok(before));
            assert_eq!(store.lookup(carol), Ok(None));

            for name in SYSTEM_INDICES {
                let present = match store.system_index(name).expect("system index") {
                    SystemIndex::Id(i) => i.reverse_key(carol),
                    SystemIndex::Value(i) => i.reverse_key(carol),
                    SystemIndex::Rdn(i) => i.reverse_key(carol),
                };
                assert_eq!(present, Ok(false), "{name}");
            }
            for (name, idx) in store.user_indices() {
                assert_eq!(idx.reverse_key(carol), Ok(false), "{name}");
            }
            assert_eq!(store.sub_level_index().forward(&people, carol), Ok(false));
            assert_eq!(store.sub_level_index().forward(&ctx, carol), Ok(false));
            assert_eq!(store.user_index("cn").and_then(|i| i.forward_key(&"carol".to_string())), Ok(false));

            // Ids are not reused.
            let dave = store
                .add(test_entry("cn=dave,ou=people,dc=example,dc=com", &[]))
                .expect("add");
            assert!(dave > carol);
        })
    }

    #[test]
    fn test_store_delete_refuses_non_leaf() {
        run_test!(|store: &Store| {
            let [_ctx, people, ..] = seed(store);
            assert_eq!(
                store.delete(people),
                Err(OperationError::NotAllowedOnNonLeaf(people.to_string()))
            );
            assert_eq!(
                store.delete(EntryId::new(42)),
                Err(OperationError::NoSuchObject("42".to_string()))
            );
        })
    }

    #[test]
    fn test_store_delete_context_resets_counter() {
        run_test!(|store: &Store| {
            let ctx = store.add(test_entry(SUFFIX, &[])).expect("add");
            let people = store
                .add(test_entry("ou=people,dc=example,dc=com", &[]))
                .expect("add");
            store.delete(people).expect("delete");
            store.delete(ctx).expect("delete");
            assert_eq!(store.count(), Ok(0));
            assert_eq!(store.add(test_entry(SUFFIX, &[])), Ok(EntryId::new(1)));
        })
    }

    #[test]
    fn test_store_list_children() {
        run_test!(|store: &Store| {
            let [ctx, people, groups, alice, bob] = seed(store);
            let mut c = store.list(people);
            let kids: Vec<EntryId> = CursorIter::new(&mut c)
                .map(|r| r.map(|ie| ie.id()))
                .collect::<Result<_, _>>()
                .expect("list");
            assert_eq!(kids, vec![alice, bob]);

            let mut c = store.list(ctx);
            assert_eq!(CursorIter::new(&mut c).count(), 2);
            assert_eq!(store.child_count(groups), Ok(0));

            let mut all = store.all_entries();
            let ids: Vec<EntryId> = CursorIter::new(&mut all)
                .map(|r| r.map(|ie| ie.id()))
                .collect::<Result<_, _>>()
                .expect("all");
            assert_eq!(ids, vec![ctx, people, groups, alice, bob]);
        })
    }

    #[test]
    fn test_store_index_access() {
        run_test!(|store: &Store| {
            assert!(store.user_index("commonName").is_ok());
            assert!(store.has_user_index("OU"));
            assert_eq!(
                store.user_index("sn").map(|_| ()),
                Err(OperationError::IndexNotFound("sn".to_string()))
            );
            assert_eq!(
                store.user_index("nosuchattr").map(|_| ()),
                Err(OperationError::IndexNotFound("nosuchattr".to_string()))
            );
            for name in SYSTEM_INDICES {
                assert_eq!(store.system_index(name).map(|i| i.name().to_string()), Ok(name.to_string()));
            }
            assert_eq!(
                store.system_index("cn").map(|_| ()),
                Err(OperationError::IndexNotFound("cn".to_string()))
            );
            assert!(store.value_index(ATTR_OBJECTCLASS).is_some());
            assert!(store.value_index("cn").is_some());
            assert!(store.value_index("sn").is_none());
        })
    }

    #[test]
    fn test_store_user_index_ignores_system_attributes() {
        sketching::test_init();
        let cfg = StoreConfig::new_test(SUFFIX)
            .with_index("objectClass")
            .with_index("cn")
            .with_index("commonName");
        let store = Store::new(cfg, Arc::new(Schema::core())).expect("store");
        assert_eq!(store.user_indices().count(), 1);

        let cfg = StoreConfig::new_test(SUFFIX).with_index("bogus");
        assert_eq!(
            Store::new(cfg, Arc::new(Schema::core())).map(|_| ()),
            Err(OperationError::InvalidAttributeName("bogus".to_string()))
        );
        let cfg = StoreConfig::new_test("");
        assert_eq!(
            Store::new(cfg, Arc::new(Schema::core())).map(|_| ()),
            Err(OperationError::InvalidDnSyntax(String::new()))
        );
    }

    #[test]
    fn test_store_verify_reports_damage() {
        sketching::test_init();
        let store = new_test_store();
        let [_ctx, _people, _groups, alice, _bob] = seed(&store);
        assert!(store.verify().is_empty());

        // Tear out the hierarchy tuples of one entry behind the store's back.
        store.rdn_index().drop(alice).expect("drop");
        store.sub_level_index().drop_value(&alice, alice).expect("drop");
        let errs: Vec<ConsistencyError> = store.verify().into_iter().filter_map(Result::err).collect();
        assert!(errs.contains(&ConsistencyError::RdnIndexMissing(alice.as_u64())));
        assert!(errs.contains(&ConsistencyError::SubLevelReflexiveMissing(alice.as_u64())));
    }

    #[test]
    fn test_store_destroy() {
        sketching::test_init();
        let store = new_test_store();
        seed(&store);
        assert_eq!(store.destroy(), Ok(()));
        assert_eq!(
            store.add(test_entry("cn=x,dc=example,dc=com", &[])),
            Err(OperationError::InvalidState)
        );
        assert_eq!(store.count(), Err(OperationError::InvalidState));
        assert_eq!(store.destroy(), Err(OperationError::InvalidState));
    }

    #[test]
    fn test_store_survives_reopen() {
        sketching::test_init();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("example.db");
        let mut cfg = StoreConfig::new_test(SUFFIX).with_index("cn");
        cfg.path = path.to_str().expect("path").to_string();
        cfg.sync_on_write = false;

        let alice = {
            let store = Store::new(cfg.clone(), Arc::new(Schema::core())).expect("store");
            let ids = seed(&store);
            store.sync().expect("sync");
            store.destroy().expect("destroy");
            ids[3]
        };

        let store = Store::new(cfg, Arc::new(Schema::core())).expect("reopen");
        assert!(store.verify().is_empty());
        assert_eq!(store.count(), Ok(5));
        assert_eq!(
            store.get_entry_id(&dn("cn=alice,ou=people,dc=example,dc=com")),
            Ok(Some(alice))
        );
        let e = store.lookup(alice).expect("lookup").expect("present");
        assert_eq!(e.get_single("sn"), Some("Smith"));
        let next = store
            .add(test_entry("cn=carol,ou=people,dc=example,dc=com", &[]))
            .expect("add");
        assert_eq!(next, EntryId::new(6));
    }

    #[test]
    fn test_store_sync_on_write_survives_drop() {
        sketching::test_init();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("example.db");
        let mut cfg = StoreConfig::new_test(SUFFIX).with_index("cn");
        cfg.path = path.to_str().expect("path").to_string();
        assert!(cfg.sync_on_write);

        let (alice, carol) = {
            let store = Store::new(cfg.clone(), Arc::new(Schema::core())).expect("store");
            let ids = seed(&store);
            let carol = store
                .add(test_entry("cn=carol,ou=people,dc=example,dc=com", &[("cn", "carol")]))
                .expect("add");
            store.delete(carol).expect("delete");
            // Dropped without sync or destroy.
            (ids[3], carol)
        };

        let store = Store::new(cfg, Arc::new(Schema::core())).expect("reopen");
        assert!(store.verify().is_empty());
        assert_eq!(store.count(), Ok(5));
        assert_eq!(
            store.get_entry_id(&dn("cn=alice,ou=people,dc=example,dc=com")),
            Ok(Some(alice))
        );
        assert_eq!(
            store.get_entry_id(&dn("cn=carol,ou=people,dc=example,dc=com")),
            Ok(None)
        );
        let dave = store
            .add(test_entry("cn=dave,ou=people,dc=example,dc=com", &[]))
            .expect("add");
        assert_eq!(dave, EntryId::new(carol.as_u64() + 1));
    }
}
