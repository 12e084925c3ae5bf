//! pvetui CLI
//!
//! Command implementations, output helpers and the token-authenticated
//! API client behind the `pvetui` binary.

pub mod client;
pub mod commands;
pub mod output;
