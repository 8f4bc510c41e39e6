//! Maintenance of the alias indices.
//!
//! The alias index maps each alias to its normalised target name. The one
//! alias and sub alias indices record the scope an alias extends: a one
//! level search at the alias's parent, or a subtree search at any of its
//! ancestors below the context entry, must also reach the target. Tuples are
//! only recorded where the target is not already in that scope.
//!
//! Tuples are not reference counted. Two aliases in the same place with the
//! same target share their scope tuples, and removing either removes them.

use crate::prelude::*;
use crate::store::Store;

/// A validated alias target.
#[derive(Debug, Clone)]
pub(super) struct AliasTarget {
    pub(super) ndn: Dn,
    pub(super) id: EntryId,
}

impl Store {
    /// Check that `target` is a valid target for an alias named `alias_dn`.
    pub(super) fn check_alias_target(
        &self,
        alias_dn: &Dn,
        target: &str,
    ) -> Result<AliasTarget, OperationError> {
        let ndn = Dn::parse(target)
            .and_then(|d| d.normalize(self.schema.as_ref()))
            .map_err(|e| {
                request_error!(?e, %target, "alias target is not a valid name");
                OperationError::AliasDereferencing(target.to_string())
            })?;

        if alias_dn.is_descendant_of(&ndn) {
            request_error!(alias = %alias_dn, %target, "alias would point at itself or an ancestor");
            return Err(OperationError::AliasDereferencing(target.to_string()));
        }
        if !ndn.is_descendant_of(&self.suffix) {
            request_error!(alias = %alias_dn, %target, "alias target is outside this partition");
            return Err(OperationError::AliasDereferencing(target.to_string()));
        }
        let Some(id) = self.get_entry_id(&ndn)? else {
            request_error!(alias = %alias_dn, %target, "alias target does not exist");
            return Err(OperationError::AliasProblem(target.to_string()));
        };
        if self.alias.reverse_key(id)? {
            request_error!(alias = %alias_dn, %target, "alias target is itself an alias");
            return Err(OperationError::AliasDereferencing(target.to_string()));
        }
        Ok(AliasTarget { ndn, id })
    }

    pub(super) fn add_alias_tuples(
        &self,
        alias_id: EntryId,
        parent_id: EntryId,
        target: &AliasTarget,
    ) -> Result<(), OperationError> {
        self.alias.add(&target.ndn.norm_name(), alias_id)?;
        let context_id = self.context_id()?;
        self.add_alias_scope(parent_id, target.id, true, context_id)
    }

    /// Record the scope extension of an alias to `target_id`, walking up from
    /// `start`. The one level tuple is only written for the alias's own
    /// parent.
    pub(super) fn add_alias_scope(
        &self,
        start: EntryId,
        target_id: EntryId,
        one_level: bool,
        context_id: Option<EntryId>,
    ) -> Result<(), OperationError> {
        if one_level && !self.one_level.forward(&start, target_id)? {
            self.one_alias.add(&start, target_id)?;
        }
        let mut cur = start;
        while !cur.is_root() && Some(cur) != context_id {
            if !self.sub_level.forward(&cur, target_id)? {
                self.sub_alias.add(&cur, target_id)?;
            }
            cur = self.parent_or_corrupt(cur)?;
        }
        Ok(())
    }

    /// Mirror of [`add_alias_scope`](Self::add_alias_scope).
    pub(super) fn drop_alias_scope(
        &self,
        start: EntryId,
        target_id: EntryId,
        one_level: bool,
        context_id: Option<EntryId>,
    ) -> Result<(), OperationError> {
        if one_level {
            self.one_alias.drop_value(&start, target_id)?;
        }
        let mut cur = start;
        while !cur.is_root() && Some(cur) != context_id {
            self.sub_alias.drop_value(&cur, target_id)?;
            cur = self.parent_or_corrupt(cur)?;
        }
        Ok(())
    }

    /// Remove an alias from every alias index. A target that no longer
    /// resolves leaves only the alias tuple to remove.
    pub(super) fn drop_alias_tuples(&self, alias_id: EntryId) -> Result<(), OperationError> {
        let target_id = self.alias_target_id(alias_id)?;
        self.alias.drop(alias_id)?;
        let Some(target_id) = target_id else {
            admin_debug!(%alias_id, "alias target no longer resolves");
            return Ok(());
        };
        let parent_id = self.parent_or_corrupt(alias_id)?;
        let context_id = self.context_id()?;
        self.drop_alias_scope(parent_id, target_id, true, context_id)
    }

    /// The current id of an alias's target, if the alias has one and it
    /// still resolves.
    pub(super) fn alias_target_id(&self, alias_id: EntryId) -> Result<Option<EntryId>, OperationError> {
        let Some(target) = self.alias.reverse_lookup(alias_id)? else {
            return Ok(None);
        };
        // Stored names are normalised and parse back to themselves.
        match Dn::parse(&target) {
            Ok(dn) => self.get_entry_id(&dn),
            Err(e) => {
                admin_warn!(?e, %alias_id, %target, "unparseable alias index key");
                Ok(None)
            }
        }
    }

    fn parent_or_corrupt(&self, id: EntryId) -> Result<EntryId, OperationError> {
        self.get_parent_id(id)?.ok_or_else(|| {
            admin_error!(%id, "entry missing from rdn index");
            OperationError::CorruptedIndex(SYS_IDX_RDN.to_string())
        })
    }
}
