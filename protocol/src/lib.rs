// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Custody Protocol: Shared Vocabulary
//!
//! Types every other crate in the workspace agrees on:
//!
//! - **address**: the 20-byte account identifier and its hex text form.
//! - **config**: ledger parameters, node defaults, and the JSON config file.
//!
//! The accounting rules themselves live in `custody-contracts`; this crate
//! carries no state.

pub mod address;
pub mod config;

pub use address::{Address, AddressError};
pub use config::{ConfigError, LedgerConfig};
