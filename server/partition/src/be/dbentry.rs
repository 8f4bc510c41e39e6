use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smartstring::alias::String as AttrString;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DbAttributeV1 {
    /// The attribute id as the user wrote it.
    #[serde(rename = "i")]
    pub id: String,
    #[serde(rename = "v")]
    pub vals: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DbEntryV1 {
    pub attrs: BTreeMap<AttrString, DbAttributeV1>,
}

// REMEMBER: If you add a new version here, you MUST
// update entry.rs to_dbentry to export to the latest
// type always!!
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum DbEntryVers {
    V1(DbEntryV1),
}

// This is actually what we store into the DB.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DbEntry {
    pub ent: DbEntryVers,
}

impl std::fmt::Debug for DbEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.ent {
            DbEntryVers::V1(dbe_v1) => {
                write!(f, "v1 - {{ ")?;
                for (k, a) in dbe_v1.attrs.iter() {
                    write!(f, "{k} - [")?;
                    for v in a.vals.iter() {
                        write!(f, "{v:?}, ")?;
                    }
                    write!(f, "], ")?;
                }
                write!(f, "}}")
            }
        }
    }
}
