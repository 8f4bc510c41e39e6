//! Entries and their identifiers.
//!
//! An [`Entry`] is an ordered map of attributes keyed by the lower cased
//! attribute name. Once an entry passes through [`Entry::schema_aware`] the
//! keys are the canonical attribute names from the schema, which is the form
//! the store persists and hands back. Values are stored as the user supplied
//! them. Normalisation happens when they are indexed or compared.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::be::dbentry::{DbAttributeV1, DbEntry, DbEntryV1, DbEntryVers};
use crate::dn::Dn;
use crate::prelude::*;
use crate::schema::SchemaView;

/// The identifier assigned to an entry by the master table sequence.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EntryId(u64);

impl EntryId {
    /// The parent of the partition context entry. Never assigned to an entry.
    pub const ROOT: EntryId = EntryId(0);

    pub const fn new(id: u64) -> Self {
        EntryId(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn is_root(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for EntryId {
    fn from(id: u64) -> Self {
        EntryId(id)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One attribute of an entry: the id the user wrote, and the values in the
/// order they were added. Exact duplicate values are not kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    up_id: String,
    values: Vec<String>,
}

impl Attribute {
    pub fn new(up_id: &str) -> Self {
        Attribute {
            up_id: up_id.to_string(),
            values: Vec::new(),
        }
    }

    pub fn up_id(&self) -> &str {
        &self.up_id
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }

    /// Returns false if the value was already present.
    pub fn add(&mut self, value: &str) -> bool {
        if self.contains(value) {
            false
        } else {
            self.values.push(value.to_string());
            true
        }
    }

    pub fn remove(&mut self, value: &str) -> bool {
        let before = self.values.len();
        self.values.retain(|v| v != value);
        before != self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    id: Option<EntryId>,
    dn: Dn,
    attrs: BTreeMap<AttrString, Attribute>,
}

impl Entry {
    pub fn new(dn: Dn) -> Self {
        Entry {
            id: None,
            dn,
            attrs: BTreeMap::new(),
        }
    }

    /// Builder style helper, mostly for tests and bootstrap entries.
    pub fn with(mut self, attr: &str, values: &[&str]) -> Self {
        for v in values {
            self.add_value(attr, v);
        }
        self
    }

    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    pub fn set_dn(&mut self, dn: Dn) {
        self.dn = dn;
    }

    pub fn id(&self) -> Option<EntryId> {
        self.id
    }

    pub fn set_id(&mut self, id: EntryId) {
        self.id = Some(id);
    }

    pub fn get(&self, attr: &str) -> Option<&Attribute> {
        self.attrs.get(attr.to_lowercase().as_str())
    }

    /// The first value of an attribute.
    pub fn get_single(&self, attr: &str) -> Option<&str> {
        self.get(attr).and_then(|a| a.values.first()).map(String::as_str)
    }

    pub fn contains(&self, attr: &str) -> bool {
        self.get(attr).map(|a| !a.is_empty()).unwrap_or(false)
    }

    pub fn contains_value(&self, attr: &str, value: &str) -> bool {
        self.get(attr).map(|a| a.contains(value)).unwrap_or(false)
    }

    /// Add one value. Returns false if the exact value was already present.
    pub fn add_value(&mut self, attr: &str, value: &str) -> bool {
        self.attrs
            .entry(AttrString::from(attr.to_lowercase()))
            .or_insert_with(|| Attribute::new(attr))
            .add(value)
    }

    /// Replace all values of an attribute. An empty set removes it.
    pub fn put(&mut self, attr: &str, values: &[String]) {
        let key = AttrString::from(attr.to_lowercase());
        if values.is_empty() {
            self.attrs.remove(&key);
            return;
        }
        let mut a = Attribute::new(attr);
        for v in values {
            a.add(v);
        }
        self.attrs.insert(key, a);
    }

    /// Remove an attribute and all its values.
    pub fn remove(&mut self, attr: &str) -> Option<Attribute> {
        self.attrs.remove(attr.to_lowercase().as_str())
    }

    pub fn remove_value(&mut self, attr: &str, value: &str) -> bool {
        self.retain_values(attr, |v| v != value) > 0
    }

    /// Keep only the values for which `keep` is true, dropping the attribute
    /// if none remain. Returns the number of values removed.
    pub fn retain_values<F>(&mut self, attr: &str, mut keep: F) -> usize
    where
        F: FnMut(&str) -> bool,
    {
        let key = attr.to_lowercase();
        let Some(a) = self.attrs.get_mut(key.as_str()) else {
            return 0;
        };
        let before = a.values.len();
        a.values.retain(|v| keep(v));
        let removed = before - a.values.len();
        if a.values.is_empty() {
            self.attrs.remove(key.as_str());
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Attribute)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// The object classes of this entry, lower cased.
    pub fn object_classes(&self) -> Vec<String> {
        self.get(ATTR_OBJECTCLASS)
            .map(|a| a.iter().map(|v| v.trim().to_lowercase()).collect())
            .unwrap_or_default()
    }

    pub fn is_alias(&self) -> bool {
        self.object_classes().iter().any(|oc| oc == OC_ALIAS)
    }

    /// Rekey every attribute by its canonical schema name, merging values
    /// written under aliases of the same type.
    pub fn schema_aware(self, schema: &dyn SchemaView) -> Result<Entry, OperationError> {
        let mut attrs: BTreeMap<AttrString, Attribute> = BTreeMap::new();
        for (key, attr) in self.attrs.into_iter() {
            let at = schema.resolve(key.as_str())?;
            let target = attrs
                .entry(AttrString::from(at.name()))
                .or_insert_with(|| Attribute::new(&attr.up_id));
            for v in attr.values.iter() {
                target.add(v);
            }
        }
        Ok(Entry {
            id: self.id,
            dn: self.dn,
            attrs,
        })
    }

    pub fn to_dbentry(&self) -> DbEntry {
        let attrs = self
            .attrs
            .iter()
            .map(|(k, a)| {
                (
                    k.clone(),
                    DbAttributeV1 {
                        id: a.up_id.clone(),
                        vals: a.values.clone(),
                    },
                )
            })
            .collect();
        DbEntry {
            ent: DbEntryVers::V1(DbEntryV1 { attrs }),
        }
    }

    /// Rebuild an entry from its stored form. The dn is not stored, the
    /// caller attaches it.
    pub fn from_dbentry(db_e: DbEntry, id: EntryId) -> Self {
        let attrs = match db_e.ent {
            DbEntryVers::V1(v1) => v1
                .attrs
                .into_iter()
                .map(|(k, a)| {
                    (
                        k,
                        Attribute {
                            up_id: a.id,
                            values: a.vals,
                        },
                    )
                })
                .collect(),
        };
        Entry {
            id: Some(id),
            dn: Dn::root(),
            attrs,
        }
    }
}
