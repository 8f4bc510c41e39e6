//! Search over an xdbm partition.
//!
//! A [`Filter`](filter::Filter) is resolved against the schema and the
//! partition's indices into a [`FilterResolved`](optimiser::FilterResolved)
//! tree annotated with candidate counts. From that tree an
//! [`Evaluator`](evaluator::Evaluator) tests single candidates and the
//! [`CursorBuilder`](builder::CursorBuilder) composes a cursor that streams
//! the matching entry ids, preferring index walks over full scans. The
//! [`SearchEngine`](engine::SearchEngine) ties these together with the base,
//! scope and alias dereferencing of a search request.

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
#[macro_use]
extern crate lazy_static;

#[cfg(test)]
#[macro_use]
mod macros;

pub mod builder;
pub mod cursor;
pub mod engine;
pub mod evaluator;
pub mod filter;
pub mod optimiser;

pub mod prelude {
    pub use xdbm_partition::prelude::*;

    pub use crate::builder::{CursorBuilder, EvaluatorBuilder};
    pub use crate::cursor::{Candidate, CandidateCursor};
    pub use crate::engine::{AliasDerefMode, SearchControls, SearchEngine, SearchScope};
    pub use crate::evaluator::Evaluator;
    pub use crate::filter::{
        f_and, f_approx, f_eq, f_ge, f_le, f_not, f_or, f_pres, f_sub, Filter, SubstringAssertion,
    };
    pub use crate::optimiser::{FilterResolved, Optimiser, ScopeAssertion};
}
