//! # Kickstart account reconciliation
//!
//! This crate applies the `sshpw` directives of an installer kickstart
//! to the user database of a target system: accounts are created or
//! updated with a password or hash, and SSH-key accounts get their key
//! authorized with password logins disabled.

pub mod cli;
pub mod config;
pub mod directive;
mod kickstart;
pub mod reconcile;
pub mod source;
pub mod store;
