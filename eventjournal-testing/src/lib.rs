//! Test support for `eventjournal` stream backends.
//!
//! - [`contract`]: the behavioural suite every backend must pass, plus the
//!   [`stream_backend_contract_tests!`] macro that wires it into `cargo test`.
//! - [`faulty`]: a backend wrapper that injects store failures and version
//!   conflicts.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use, unused_results, unused_imports)]
#![warn(missing_docs)]

pub mod contract;
pub mod faulty;

pub use faulty::*;
