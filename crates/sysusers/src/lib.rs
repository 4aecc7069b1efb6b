//! Read-only access to the user database of a target root.
//!
//! The installed system is usually not the root we are running from, so
//! nothing here goes through NSS; we parse `etc/passwd` and `etc/shadow`
//! relative to a directory handle instead.

use std::io::Read;

use cap_std_ext::cap_std::fs::Dir;
use cap_std_ext::dirext::CapStdExtDirExt;
use serde::Serialize;

pub mod nameservice;
mod name;
pub use name::*;

use nameservice::passwd::PasswdEntry;
use nameservice::shadow::ShadowEntry;

const PASSWD: &str = "etc/passwd";
const SHADOW: &str = "etc/shadow";

/// An error while loading the user database.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reading one of the database files failed.
    #[error("Reading {path}")]
    Io {
        /// Path relative to the target root
        path: &'static str,
        /// The underlying error
        #[source]
        err: std::io::Error,
    },
    /// A line could not be parsed.
    #[error("Malformed {path} line {line}: {reason}")]
    Parse {
        /// Path relative to the target root
        path: &'static str,
        /// One-based line number
        line: usize,
        /// What was wrong with it
        reason: String,
    },
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of the password hash stored for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PasswordState {
    /// A usable hash is present.
    Set,
    /// The hash is prefixed with `!`, so password login is refused.
    Locked,
    /// The hash can never match (e.g. `*`).
    Disabled,
    /// The hash field is empty; anyone can log in without a password.
    Empty,
    /// There is no shadow entry for the account.
    Unknown,
}

impl PasswordState {
    /// Classify a raw shadow password field.
    pub fn from_hash(hash: &str) -> Self {
        match hash {
            "" => Self::Empty,
            h if h.starts_with('!') => Self::Locked,
            // Valid crypt(3) output never starts with `*` and never contains `:`.
            h if h.starts_with('*') => Self::Disabled,
            _ => Self::Set,
        }
    }
}

impl std::fmt::Display for PasswordState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Set => "set",
            Self::Locked => "locked",
            Self::Disabled => "disabled",
            Self::Empty => "empty",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// The parsed user database of a target root.
#[derive(Debug, Default)]
pub struct UserDb {
    passwd: Vec<PasswdEntry>,
    shadow: Vec<ShadowEntry>,
}

fn read_optional(root: &Dir, path: &'static str) -> Result<Option<String>> {
    let Some(mut f) = root
        .open_optional(path)
        .map_err(|err| Error::Io { path, err })?
    else {
        return Ok(None);
    };
    let mut buf = String::new();
    f.read_to_string(&mut buf)
        .map_err(|err| Error::Io { path, err })?;
    Ok(Some(buf))
}

impl UserDb {
    /// Load the database from `root`.  A missing `etc/passwd` yields an
    /// empty database; a missing `etc/shadow` leaves every password state
    /// [`PasswordState::Unknown`].
    pub fn load(root: &Dir) -> Result<Self> {
        let passwd = match read_optional(root, PASSWD)? {
            Some(buf) => nameservice::passwd::parse_passwd_content(&buf)?,
            None => Vec::new(),
        };
        let shadow = match read_optional(root, SHADOW)? {
            Some(buf) => nameservice::shadow::parse_shadow_content(&buf)?,
            None => Vec::new(),
        };
        Ok(Self { passwd, shadow })
    }

    /// Find a user by name.  If the name is listed more than once, the
    /// first entry wins, as with glibc.
    pub fn user(&self, name: &str) -> Option<&PasswdEntry> {
        self.passwd.iter().find(|e| e.name == name)
    }

    /// Whether a user with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.user(name).is_some()
    }

    /// All users, in file order.
    pub fn users(&self) -> impl Iterator<Item = &PasswdEntry> {
        self.passwd.iter()
    }

    /// The state of the password hash for a user.
    pub fn password_state(&self, name: &str) -> PasswordState {
        self.shadow
            .iter()
            .find(|e| e.name == name)
            .map(|e| PasswordState::from_hash(&e.password))
            .unwrap_or(PasswordState::Unknown)
    }
}
