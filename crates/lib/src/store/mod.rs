//! The identity store holds the accounts of the target system:
//! names, password hashes, lock flags and authorized SSH keys.
//!
//! # Shadow utils
//!
//! The real backend drives `useradd`, `chpasswd` and `usermod` against
//! a target root and writes `authorized_keys` itself.
//!
//! # Dry run
//!
//! Wraps another store, answering existence checks from it but only
//! recording mutations.

use ksaccounts_sysusers::{validate_username, InvalidUsername};

mod dryrun;
#[cfg(test)]
pub(crate) mod memory;
mod shadowutils;

pub use dryrun::DryRunStore;
pub use shadowutils::{authorized_keys, ShadowUtilsStore};

/// An identity store operation failed.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The account name would be refused by shadow-utils.
    #[error(transparent)]
    InvalidUsername(#[from] InvalidUsername),
    /// The password cannot be handed to the store safely.
    #[error("Invalid password for user {username}: {reason}")]
    InvalidPassword {
        /// The account
        username: String,
        /// What is wrong with it
        reason: &'static str,
    },
    /// The key cannot be written as a single `authorized_keys` entry.
    #[error("Malformed SSH key for user {0}")]
    InvalidSshKey(String),
    /// The operation needs an existing account.
    #[error("No such user: {0}")]
    NoSuchUser(String),
    /// The target's user database could not be read.
    #[error("Reading user database")]
    Database(#[from] ksaccounts_sysusers::Error),
    /// Filesystem access in the target root failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// An external tool failed.
    #[error("{0:#}")]
    Command(anyhow::Error),
}

/// The operations the reconciler needs from an identity store.
///
/// Implementations are rooted at a target system chosen when they are
/// constructed.  Calls are made sequentially and the caller guarantees
/// there is no concurrent writer.
pub trait IdentityStore {
    /// Whether an account named `username` exists.
    fn exists(&self, username: &str) -> Result<bool, StoreError>;

    /// Create an account with the given password and lock state.
    fn create_user(
        &mut self,
        username: &str,
        password: &str,
        is_hashed: bool,
        locked: bool,
    ) -> Result<(), StoreError>;

    /// Replace the password of an existing account and set its lock state.
    fn set_password(
        &mut self,
        username: &str,
        password: &str,
        is_hashed: bool,
        locked: bool,
    ) -> Result<(), StoreError>;

    /// Authorize `key` for SSH logins to an existing account.
    fn set_ssh_key(&mut self, username: &str, key: &str) -> Result<(), StoreError>;
}

/// Shared validation for [`IdentityStore::create_user`] and
/// [`IdentityStore::set_password`], run before the store is touched.
///
/// Passwords travel as `name:password` lines, so line breaks and NUL are
/// refused; a hash lands verbatim in a colon separated shadow field.
pub fn check_credential_args(
    username: &str,
    password: &str,
    is_hashed: bool,
) -> Result<(), StoreError> {
    validate_username(username)?;
    let invalid = |reason| {
        Err(StoreError::InvalidPassword {
            username: username.to_owned(),
            reason,
        })
    };
    if password.contains(['\n', '\r', '\0']) {
        return invalid("contains a line break or NUL");
    }
    if is_hashed && password.contains(':') {
        return invalid("hash contains ':'");
    }
    Ok(())
}

/// Validation for [`IdentityStore::set_ssh_key`].
pub fn check_ssh_key_args(username: &str, key: &str) -> Result<(), StoreError> {
    validate_username(username)?;
    if key.trim().is_empty() || key.contains(['\n', '\r', '\0']) {
        return Err(StoreError::InvalidSshKey(username.to_owned()));
    }
    Ok(())
}
