//! Entry mutations: add, modify, delete, rename and move.

use std::sync::Arc;

use crate::prelude::*;
use crate::rdn::ParentIdAndRdn;
use crate::schema::SchemaAttribute;
use crate::store::alias::AliasTarget;
use crate::store::Store;

/// Value index tuples of an entry, normalised before any are written.
struct ValueTuples<'a> {
    values: Vec<(&'a Index<String>, String)>,
    presence: Vec<String>,
}

impl Store {
    fn value_tuples(&self, entry: &Entry) -> Result<ValueTuples<'_>, OperationError> {
        let mut tuples = ValueTuples {
            values: Vec::new(),
            presence: Vec::new(),
        };
        for (name, attr) in entry.iter() {
            let at = self.schema.resolve(name)?;
            // Normalising every value rejects bad syntax even on attributes
            // that are not indexed.
            let normed = attr
                .iter()
                .map(|v| at.normalize(self.schema.as_ref(), v))
                .collect::<Result<Vec<_>, _>>()?;
            let Some(idx) = self.value_index(at.name()) else {
                continue;
            };
            if self.user_indices.contains_key(at.name()) && !attr.is_empty() {
                tuples.presence.push(at.oid.clone());
            }
            tuples.values.extend(normed.into_iter().map(|n| (idx, n)));
        }
        Ok(tuples)
    }

    fn check_mandatory(entry: &Entry) -> Result<(), OperationError> {
        if !entry.contains(ATTR_OBJECTCLASS) {
            admin_error!(dn = %entry.dn(), "entry has no object class");
            return Err(OperationError::SchemaViolation(SchemaError::NoClassFound));
        }
        let missing: Vec<String> = [ATTR_ENTRYCSN, ATTR_ENTRYUUID]
            .into_iter()
            .filter(|a| !entry.contains(a))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            admin_error!(dn = %entry.dn(), ?missing, "entry is missing operational attributes");
            return Err(OperationError::SchemaViolation(
                SchemaError::MissingMustAttribute(missing),
            ));
        }
        Ok(())
    }

    /// The entry a rename or move starts from: the caller's copy if one was
    /// supplied, else the stored one.
    fn working_entry(&self, id: EntryId, supplied: Option<Entry>) -> Result<Entry, OperationError> {
        match supplied {
            Some(e) => e.schema_aware(self.schema.as_ref()),
            None => self
                .master
                .get(id)?
                .map(|e| (*e).clone())
                .ok_or_else(|| OperationError::NoSuchObject(id.to_string())),
        }
    }

    fn check_target_free(&self, new_dn: &Dn, id: EntryId) -> Result<(), OperationError> {
        match self.get_entry_id(new_dn)? {
            Some(other) if other != id => {
                admin_error!(dn = %new_dn, %other, "target name is already in use");
                Err(OperationError::AlreadyExists(new_dn.up_name()))
            }
            _ => Ok(()),
        }
    }

    fn resolve_existing(&self, dn: &Dn) -> Result<(Dn, EntryId), OperationError> {
        let ndn = self.normalize_dn(dn)?;
        let id = self.get_entry_id(&ndn)?.ok_or_else(|| {
            request_error!(dn = %ndn, "no such entry");
            OperationError::NoSuchObject(ndn.up_name())
        })?;
        Ok((ndn, id))
    }

    /// Add an entry, returning its new id. The parent must already exist,
    /// unless the entry is the context entry named by the suffix.
    #[instrument(level = "debug", name = "store::add", skip_all)]
    pub fn add(&self, entry: Entry) -> Result<EntryId, OperationError> {
        let _guard = self.write_guard()?;
        let mut entry = entry.schema_aware(self.schema.as_ref())?;
        let ndn = self.normalize_dn(entry.dn())?;

        if ndn.relative_to(&self.suffix).is_none() {
            request_error!(dn = %ndn, suffix = %self.suffix, "entry is not within this partition");
            return Err(OperationError::NoSuchObject(ndn.up_name()));
        }
        if self.get_entry_id(&ndn)?.is_some() {
            request_error!(dn = %ndn, "entry already exists");
            return Err(OperationError::AlreadyExists(ndn.up_name()));
        }

        let (parent_id, rdns) = if ndn == self.suffix {
            (EntryId::ROOT, self.suffix.rdns().to_vec())
        } else {
            let parent_dn = ndn.parent().unwrap_or_default();
            let parent_id = self.get_entry_id(&parent_dn)?.ok_or_else(|| {
                request_error!(parent = %parent_dn, "parent entry does not exist");
                OperationError::NoSuchObject(parent_dn.up_name())
            })?;
            let rdn = ndn
                .rdn()
                .cloned()
                .ok_or_else(|| OperationError::InvalidDnSyntax(ndn.up_name()))?;
            (parent_id, vec![rdn])
        };

        Self::check_mandatory(&entry)?;
        let alias_target = if entry.is_alias() {
            let target = entry.get_single(ATTR_ALIASED_OBJECT_NAME).ok_or_else(|| {
                request_error!(dn = %ndn, "alias entry has no target");
                OperationError::SchemaViolation(SchemaError::MissingMustAttribute(vec![
                    ATTR_ALIASED_OBJECT_NAME.to_string(),
                ]))
            })?;
            Some(self.check_alias_target(&ndn, target)?)
        } else {
            None
        };
        let tuples = self.value_tuples(&entry)?;

        // Nothing is written before this point.
        let id = self.master.get_next_id()?;
        self.rdn.add(&ParentIdAndRdn::new(parent_id, rdns), id)?;

        for (idx, value) in tuples.values.iter() {
            idx.add(value, id)?;
        }
        for oid in tuples.presence.iter() {
            self.presence.add(oid, id)?;
        }

        if let Some(target) = alias_target.as_ref() {
            self.add_alias_tuples(id, parent_id, target)?;
        }

        self.one_level.add(&parent_id, id)?;
        self.sub_level.add(&id, id)?;
        for ancestor in self.ancestors(parent_id)? {
            self.sub_level.add(&ancestor, id)?;
        }

        entry.put(ATTR_ENTRYPARENTID, &[parent_id.to_string()]);
        entry.set_id(id);
        self.master.put(id, &entry)?;
        self.sync_on_write()?;

        admin_debug!(%id, dn = %ndn, "entry added");
        Ok(id)
    }

    /// Delete a leaf entry.
    #[instrument(level = "debug", name = "store::delete", skip_all)]
    pub fn delete(&self, id: EntryId) -> Result<(), OperationError> {
        let _guard = self.write_guard()?;
        if self.master.get(id)?.is_none() {
            request_error!(%id, "no such entry");
            return Err(OperationError::NoSuchObject(id.to_string()));
        }
        if self.one_level.forward_key(&id)? {
            request_error!(%id, "entry has children");
            return Err(OperationError::NotAllowedOnNonLeaf(id.to_string()));
        }

        let parent_id = self.get_parent_id(id)?;
        if self.alias.reverse_key(id)? {
            self.drop_alias_tuples(id)?;
        }

        self.objectclass.drop(id)?;
        self.rdn.drop(id)?;
        self.one_level.drop(id)?;
        self.sub_level.drop(id)?;
        self.entry_csn.drop(id)?;
        self.entry_uuid.drop(id)?;
        // Tuples naming this entry as the target of some alias.
        self.one_alias.drop(id)?;
        self.sub_alias.drop(id)?;
        for idx in self.user_indices.values() {
            idx.drop(id)?;
        }
        self.presence.drop(id)?;

        self.master.delete(id)?;
        if parent_id == Some(EntryId::ROOT) {
            // The context entry can only go once everything else has.
            self.master.reset_counter()?;
        }
        self.sync_on_write()?;

        admin_debug!(%id, "entry deleted");
        Ok(())
    }

    /// Apply modifications in order, returning the updated entry.
    #[instrument(level = "debug", name = "store::modify", skip_all)]
    pub fn modify(&self, dn: &Dn, mods: &[Modification]) -> Result<Entry, OperationError> {
        let _guard = self.write_guard()?;
        let (_, id) = self.resolve_existing(dn)?;
        self.modify_locked(id, mods)
    }

    /// Apply one operation to every attribute carried by `changes`.
    pub fn modify_all(&self, dn: &Dn, op: ModOp, changes: &Entry) -> Result<Entry, OperationError> {
        let mods: Vec<Modification> = changes
            .iter()
            .map(|(name, attr)| Modification {
                op,
                attribute: name.to_string(),
                values: attr.values().to_vec(),
            })
            .collect();
        self.modify(dn, &mods)
    }

    #[instrument(level = "debug", name = "store::modify_by_id", skip_all)]
    pub fn modify_by_id(&self, id: EntryId, mods: &[Modification]) -> Result<Entry, OperationError> {
        let _guard = self.write_guard()?;
        self.modify_locked(id, mods)
    }

    fn modify_locked(&self, id: EntryId, mods: &[Modification]) -> Result<Entry, OperationError> {
        let mut entry = self
            .master
            .get(id)?
            .map(|e| (*e).clone())
            .ok_or_else(|| OperationError::NoSuchObject(id.to_string()))?;

        // Resolve every attribute before touching anything.
        let resolved = mods
            .iter()
            .map(|m| self.schema.resolve(&m.attribute).map(|at| (m, at)))
            .collect::<Result<Vec<_>, _>>()?;

        // Likewise every value that will be stored.
        for (m, at) in resolved.iter() {
            if m.op == ModOp::Remove {
                continue;
            }
            if at.name() == ATTR_ALIASED_OBJECT_NAME {
                let alias_dn = self.get_entry_dn(id)?;
                for v in m.values.iter() {
                    self.check_alias_target(&alias_dn, v)?;
                }
            }
            for v in m.values.iter() {
                at.normalize(self.schema.as_ref(), v)?;
            }
        }

        for (m, at) in resolved.iter() {
            match m.op {
                ModOp::Add => self.add_values(id, &mut entry, at, &m.values)?,
                ModOp::Remove => self.remove_values(id, &mut entry, at, &m.values)?,
                ModOp::Replace => {
                    self.remove_values(id, &mut entry, at, &[])?;
                    self.add_values(id, &mut entry, at, &m.values)?;
                }
            }
        }

        self.entry_csn.drop(id)?;
        if let Some(csns) = entry.get(ATTR_ENTRYCSN) {
            let at = self.schema.resolve(ATTR_ENTRYCSN)?;
            for v in csns.iter() {
                self.entry_csn
                    .add(&at.normalize(self.schema.as_ref(), v)?, id)?;
            }
        }

        self.master.put(id, &entry)?;
        self.sync_on_write()?;

        entry.set_dn(self.get_entry_dn(id)?);
        admin_debug!(%id, mods = mods.len(), "entry modified");
        Ok(entry)
    }

    fn add_values(
        &self,
        id: EntryId,
        entry: &mut Entry,
        at: &Arc<SchemaAttribute>,
        values: &[String],
    ) -> Result<(), OperationError> {
        let name = at.name();
        let targets = if name == ATTR_ALIASED_OBJECT_NAME {
            let alias_dn = self.get_entry_dn(id)?;
            values
                .iter()
                .map(|v| self.check_alias_target(&alias_dn, v))
                .collect::<Result<Vec<AliasTarget>, _>>()?
        } else {
            Vec::new()
        };
        let normed = values
            .iter()
            .map(|v| at.normalize(self.schema.as_ref(), v))
            .collect::<Result<Vec<_>, _>>()?;

        if !targets.is_empty() {
            let parent_id = self
                .get_parent_id(id)?
                .ok_or_else(|| OperationError::CorruptedIndex(SYS_IDX_RDN.to_string()))?;
            for target in targets.iter() {
                self.add_alias_tuples(id, parent_id, target)?;
            }
        }

        let was_present = entry.contains(name);
        let idx = self.value_index(name);
        for (v, n) in values.iter().zip(normed.iter()) {
            if entry.add_value(name, v) {
                if let Some(idx) = idx {
                    idx.add(n, id)?;
                }
            }
        }
        if self.user_indices.contains_key(name) && !was_present && entry.contains(name) {
            self.presence.add(&at.oid, id)?;
        }
        Ok(())
    }

    /// Remove values by equality, or the whole attribute when `values` is
    /// empty.
    fn remove_values(
        &self,
        id: EntryId,
        entry: &mut Entry,
        at: &Arc<SchemaAttribute>,
        values: &[String],
    ) -> Result<(), OperationError> {
        let name = at.name();
        let Some(existing) = entry.get(name).map(|a| a.values().to_vec()) else {
            return Ok(());
        };
        let schema = self.schema.as_ref();

        let asserted = values
            .iter()
            .map(|v| at.normalize(schema, v))
            .collect::<Result<Vec<_>, _>>()?;

        // A stored value that no longer normalises can only go by exact match.
        let (gone, kept): (Vec<_>, Vec<_>) = existing
            .into_iter()
            .map(|v| {
                let n = at.normalize(schema, &v).ok();
                (v, n)
            })
            .partition(|(v, n)| {
                values.is_empty()
                    || values.contains(v)
                    || n.as_ref().map(|n| asserted.contains(n)).unwrap_or(false)
            });
        if gone.is_empty() {
            return Ok(());
        }

        if name == ATTR_ALIASED_OBJECT_NAME {
            self.drop_alias_tuples(id)?;
        }

        entry.retain_values(name, |v| !gone.iter().any(|(g, _)| g == v));

        if let Some(idx) = self.value_index(name) {
            for (_, n) in gone.iter() {
                let Some(n) = n else { continue };
                // Another surviving value may share the normalised key.
                if !kept.iter().any(|(_, k)| k.as_ref() == Some(n)) {
                    idx.drop_value(n, id)?;
                }
            }
        }
        if self.user_indices.contains_key(name) && !entry.contains(name) {
            self.presence.drop_value(&at.oid, id)?;
        }
        Ok(())
    }

    /// Bring the entry's attributes in line with a new rdn.
    fn apply_rdn_values(
        &self,
        id: EntryId,
        entry: &mut Entry,
        old_rdn: &Rdn,
        new_rdn: &Rdn,
        delete_old_rdn: bool,
    ) -> Result<(), OperationError> {
        for ava in new_rdn.avas() {
            let at = self.schema.resolve(ava.up_type())?;
            self.add_values(id, entry, &at, &[ava.up_value().to_string()])?;
        }
        if delete_old_rdn {
            for ava in old_rdn.avas() {
                if new_rdn.avas().contains(ava) {
                    continue;
                }
                let at = self.schema.resolve(ava.up_type())?;
                self.remove_values(id, entry, &at, &[ava.up_value().to_string()])?;
            }
        }
        Ok(())
    }

    /// Give an entry a new rdn under the same parent. Returns the new name.
    #[instrument(level = "debug", name = "store::rename", skip_all)]
    pub fn rename(
        &self,
        dn: &Dn,
        new_rdn: &Rdn,
        delete_old_rdn: bool,
        entry: Option<Entry>,
    ) -> Result<Dn, OperationError> {
        let _guard = self.write_guard()?;
        let (ndn, id) = self.resolve_existing(dn)?;
        if ndn == self.suffix {
            admin_error!(dn = %ndn, "the context entry cannot be renamed");
            return Err(OperationError::InvalidState);
        }
        let new_rdn = new_rdn.normalize(self.schema.as_ref())?;
        let key = self
            .rdn
            .reverse_lookup(id)?
            .ok_or_else(|| OperationError::CorruptedIndex(SYS_IDX_RDN.to_string()))?;
        let parent_dn = ndn.parent().unwrap_or_default();
        let old_rdn = ndn
            .rdn()
            .cloned()
            .ok_or_else(|| OperationError::InvalidDnSyntax(ndn.up_name()))?;
        self.check_target_free(&parent_dn.child(new_rdn.clone()), id)?;

        let mut entry = self.working_entry(id, entry)?;
        self.apply_rdn_values(id, &mut entry, &old_rdn, &new_rdn, delete_old_rdn)?;

        self.rdn.drop(id)?;
        self.rdn
            .add(&ParentIdAndRdn::single(key.parent_id(), new_rdn), id)?;

        self.master.put(id, &entry)?;
        self.sync_on_write()?;

        let new_dn = self.get_entry_dn(id)?;
        admin_debug!(%id, from = %ndn, to = %new_dn, "entry renamed");
        Ok(new_dn)
    }

    fn check_move(
        &self,
        ndn: &Dn,
        id: EntryId,
        new_superior: &Dn,
    ) -> Result<(EntryId, EntryId, Dn), OperationError> {
        if *ndn == self.suffix {
            admin_error!(dn = %ndn, "the context entry cannot be moved");
            return Err(OperationError::InvalidState);
        }
        let (new_parent_dn, new_parent_id) = self.resolve_existing(new_superior)?;
        if self.sub_level.forward(&id, new_parent_id)? {
            request_error!(dn = %ndn, superior = %new_parent_dn, "an entry cannot be moved below itself");
            return Err(OperationError::InvalidState);
        }
        let old_parent_id = self
            .get_parent_id(id)?
            .ok_or_else(|| OperationError::CorruptedIndex(SYS_IDX_RDN.to_string()))?;
        Ok((old_parent_id, new_parent_id, new_parent_dn))
    }

    /// Move an entry and its subtree below a new parent, keeping its rdn.
    /// Returns the new name.
    #[instrument(level = "debug", name = "store::move_entry", skip_all)]
    pub fn move_entry(
        &self,
        dn: &Dn,
        new_superior: &Dn,
        entry: Option<Entry>,
    ) -> Result<Dn, OperationError> {
        let _guard = self.write_guard()?;
        let (ndn, id) = self.resolve_existing(dn)?;
        let (old_parent_id, new_parent_id, new_parent_dn) =
            self.check_move(&ndn, id, new_superior)?;
        let key = self
            .rdn
            .reverse_lookup(id)?
            .ok_or_else(|| OperationError::CorruptedIndex(SYS_IDX_RDN.to_string()))?;
        let rdn = ndn
            .rdn()
            .cloned()
            .ok_or_else(|| OperationError::InvalidDnSyntax(ndn.up_name()))?;
        self.check_target_free(&new_parent_dn.child(rdn), id)?;

        let mut entry = self.working_entry(id, entry)?;
        self.move_indices(id, old_parent_id, new_parent_id, key.rdns().to_vec())?;

        entry.put(ATTR_ENTRYPARENTID, &[new_parent_id.to_string()]);
        self.master.put(id, &entry)?;
        self.sync_on_write()?;

        let new_dn = self.get_entry_dn(id)?;
        admin_debug!(%id, from = %ndn, to = %new_dn, "entry moved");
        Ok(new_dn)
    }

    /// Move and rename in one step. Returns the new name.
    #[instrument(level = "debug", name = "store::move_and_rename", skip_all)]
    pub fn move_and_rename(
        &self,
        dn: &Dn,
        new_superior: &Dn,
        new_rdn: &Rdn,
        delete_old_rdn: bool,
        entry: Option<Entry>,
    ) -> Result<Dn, OperationError> {
        let _guard = self.write_guard()?;
        let (ndn, id) = self.resolve_existing(dn)?;
        let (old_parent_id, new_parent_id, new_parent_dn) =
            self.check_move(&ndn, id, new_superior)?;
        let new_rdn = new_rdn.normalize(self.schema.as_ref())?;
        let old_rdn = ndn
            .rdn()
            .cloned()
            .ok_or_else(|| OperationError::InvalidDnSyntax(ndn.up_name()))?;
        self.check_target_free(&new_parent_dn.child(new_rdn.clone()), id)?;

        let mut entry = self.working_entry(id, entry)?;
        self.apply_rdn_values(id, &mut entry, &old_rdn, &new_rdn, delete_old_rdn)?;
        self.move_indices(id, old_parent_id, new_parent_id, vec![new_rdn])?;

        entry.put(ATTR_ENTRYPARENTID, &[new_parent_id.to_string()]);
        self.master.put(id, &entry)?;
        self.sync_on_write()?;

        let new_dn = self.get_entry_dn(id)?;
        admin_debug!(%id, from = %ndn, to = %new_dn, "entry moved and renamed");
        Ok(new_dn)
    }

    /// Rehome `id` and its subtree. The cost is the size of the subtree times
    /// the depth of the old and new parents.
    fn move_indices(
        &self,
        id: EntryId,
        old_parent_id: EntryId,
        new_parent_id: EntryId,
        rdns: Vec<Rdn>,
    ) -> Result<(), OperationError> {
        let context_id = self.context_id()?;

        // id first, then every descendant.
        let subtree = self.sub_level.forward_values(&id)?;
        let mut aliases = Vec::new();
        for member in subtree.iter() {
            if let Some(target_id) = self.alias_target_id(*member)? {
                aliases.push((*member, target_id));
            }
        }
        for (alias_id, target_id) in aliases.iter() {
            self.drop_alias_scope(old_parent_id, *target_id, *alias_id == id, context_id)?;
        }

        let old_chain = self.ancestors(old_parent_id)?;
        let new_chain = self.ancestors(new_parent_id)?;

        self.one_level.drop_value(&old_parent_id, id)?;
        self.one_level.add(&new_parent_id, id)?;

        for member in subtree.iter() {
            for ancestor in old_chain.iter() {
                self.sub_level.drop_value(ancestor, *member)?;
            }
        }
        for member in subtree.iter() {
            for ancestor in new_chain.iter() {
                self.sub_level.add(ancestor, *member)?;
            }
        }

        self.rdn.drop(id)?;
        self.rdn.add(&ParentIdAndRdn::new(new_parent_id, rdns), id)?;

        for (alias_id, target_id) in aliases.iter() {
            self.add_alias_scope(new_parent_id, *target_id, *alias_id == id, context_id)?;
        }

        perf_trace!(
            subtree = subtree.len(),
            old_depth = old_chain.len(),
            new_depth = new_chain.len(),
            "sub level index rehomed"
        );
        Ok(())
    }
}
