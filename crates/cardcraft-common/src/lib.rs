//! CardCraft Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the CardCraft workspace.
//!
//! - **Error Handling**: [`CommonError`] and the [`Result`] alias
//! - **Checksums**: SHA-256 helpers used for content signatures and dataset digests
//! - **Logging**: the [`logging`] subsystem every binary initializes at startup
//!
//! # Example
//!
//! ```no_run
//! use cardcraft_common::checksum::sha256_hex;
//!
//! let digest = sha256_hex(b"Black Lotus");
//! assert_eq!(digest.len(), 64);
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
