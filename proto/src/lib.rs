//! Types shared between the xdbm partition and the search layer that sits
//! above it. Nothing in here touches storage.

#![warn(unused_extern_crates)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod internal;

pub mod prelude {
    pub use crate::internal::{ConsistencyError, OperationError, SchemaError};
}
