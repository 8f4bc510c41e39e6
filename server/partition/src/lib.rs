//! The xdbm entry partition. An entry store built on a master table of
//! entries and a set of two way indices over them, all held in one SQLite
//! database. The store keeps the hierarchy, alias and attribute indices
//! consistent across every add, modify, rename, move and delete, and exposes
//! them to the search layer.

#![recursion_limit = "512"]
#![warn(unused_extern_crates)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]
#![allow(clippy::unreachable)]

#[macro_use]
extern crate tracing;

pub mod be;
pub mod config;
pub mod constants;
pub mod csn;
pub mod cursor;
pub mod dn;
pub mod entry;
pub mod modify;
pub mod rdn;
pub mod schema;
pub mod store;

/// A prelude of imports that should be imported by all other modules to
/// help make imports cleaner.
pub mod prelude {
    pub use sketching::{
        admin_debug, admin_error, admin_info, admin_warn, filter_error, filter_info, filter_trace,
        filter_warn, perf_trace, request_error, request_info, request_trace, request_warn,
        tagged_event, EventTag,
    };
    pub use smartstring::alias::String as AttrString;
    pub use xdbm_proto::prelude::{ConsistencyError, OperationError, SchemaError};

    pub use crate::be::index::{Index, IndexKey};
    pub use crate::config::{IndexConfig, StoreConfig};
    pub use crate::constants::*;
    pub use crate::cursor::{AllEntriesCursor, Cursor, CursorIter, IndexEntry};
    pub use crate::dn::{Dn, Rdn};
    pub use crate::entry::{Attribute, Entry, EntryId};
    pub use crate::modify::{m_add, m_purge, m_remove, m_replace, ModOp, Modification};
    pub use crate::schema::{MatchingRule, Schema, SchemaAttribute, SchemaView};
    pub use crate::store::{Store, SystemIndex};
}
