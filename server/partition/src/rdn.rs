//! The key of the RDN index.
//!
//! Every entry is recorded once as its parent's id plus its own rdn. The
//! context entry of a partition has [`EntryId::ROOT`] as its parent and
//! carries every rdn of the suffix, so walking parent links from any entry
//! and concatenating the rdns rebuilds its full name.
//!
//! Keys order by parent first, then number of rdns, then each normalised
//! rdn. All children of one parent are therefore contiguous in the index and
//! sorted by name, which is what child listing relies on.

use std::cmp::Ordering;
use std::fmt;

use crate::be::codec::TableCodec;
use crate::be::serde_json_error;
use crate::dn::Rdn;
use crate::entry::EntryId;
use crate::prelude::*;

#[derive(Debug, Clone)]
pub struct ParentIdAndRdn {
    parent_id: EntryId,
    rdns: Vec<Rdn>,
}

impl ParentIdAndRdn {
    pub fn new(parent_id: EntryId, rdns: Vec<Rdn>) -> Self {
        ParentIdAndRdn { parent_id, rdns }
    }

    pub fn single(parent_id: EntryId, rdn: Rdn) -> Self {
        ParentIdAndRdn {
            parent_id,
            rdns: vec![rdn],
        }
    }

    /// The smallest key with this parent. Positioning before it and walking
    /// forward visits the parent's children.
    pub fn lower_bound(parent_id: EntryId) -> Self {
        ParentIdAndRdn {
            parent_id,
            rdns: Vec::new(),
        }
    }

    pub fn parent_id(&self) -> EntryId {
        self.parent_id
    }

    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    pub fn with_parent(&self, parent_id: EntryId) -> Self {
        ParentIdAndRdn {
            parent_id,
            rdns: self.rdns.clone(),
        }
    }
}

impl PartialEq for ParentIdAndRdn {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ParentIdAndRdn {}

impl PartialOrd for ParentIdAndRdn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ParentIdAndRdn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parent_id
            .cmp(&other.parent_id)
            .then_with(|| self.rdns.len().cmp(&other.rdns.len()))
            .then_with(|| {
                self.rdns
                    .iter()
                    .zip(other.rdns.iter())
                    .map(|(a, b)| a.norm_name().cmp(&b.norm_name()))
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            })
    }
}

impl fmt::Display for ParentIdAndRdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, [", self.parent_id)?;
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", rdn.norm_name())?;
        }
        write!(f, "]>")
    }
}

impl TableCodec for ParentIdAndRdn {
    // Normalised names never contain a nul byte, so terminating each one
    // with it keeps a shorter name ahead of any name it prefixes.
    fn sort_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.rdns.len() * 16);
        out.extend_from_slice(&self.parent_id.as_u64().to_be_bytes());
        out.extend_from_slice(&(self.rdns.len() as u32).to_be_bytes());
        for rdn in self.rdns.iter() {
            out.extend_from_slice(rdn.norm_name().as_bytes());
            out.push(0);
        }
        out
    }

    fn data_bytes(&self) -> Result<Vec<u8>, OperationError> {
        serde_json::to_vec(&self.rdns).map_err(serde_json_error)
    }

    fn decode(sort: &[u8], data: &[u8]) -> Result<Self, OperationError> {
        let parent = sort.get(..8).ok_or_else(|| {
            admin_error!(len = sort.len(), "rdn index key is truncated");
            OperationError::CorruptedIndex(SYS_IDX_RDN.to_string())
        })?;
        let parent_id = EntryId::decode(parent, &[])?;
        let rdns: Vec<Rdn> = serde_json::from_slice(data).map_err(serde_json_error)?;
        Ok(ParentIdAndRdn { parent_id, rdns })
    }
}
