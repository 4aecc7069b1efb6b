//! # Account directives
//!
//! A directive is the requested state of one account, built once from a
//! parsed input record and consumed by a single reconciliation pass.

use serde::{Deserialize, Serialize};

use crate::reconcile::DISABLED_PASSWORD_HASH;

/// The credential a directive applies.  Exactly one mode per directive.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// A cleartext password, hashed by the identity store.
    PlaintextPassword(String),
    /// A crypt(3) hash, stored verbatim.
    HashedPassword(String),
    /// A public key line for `authorized_keys`.  Password login is
    /// disabled for these accounts.
    SshKey(String),
}

// Passwords and hashes must never reach logs; public keys are fine.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PlaintextPassword(_) => f.write_str("PlaintextPassword(<redacted>)"),
            Self::HashedPassword(_) => f.write_str("HashedPassword(<redacted>)"),
            Self::SshKey(k) => f.debug_tuple("SshKey").field(k).finish(),
        }
    }
}

impl Credential {
    /// A stable name for the credential mode.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlaintextPassword(_) => "plaintext",
            Self::HashedPassword(_) => "hashed",
            Self::SshKey(_) => "ssh-key",
        }
    }
}

/// A record that cannot be turned into a directive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedDirectiveError {
    /// The username field is empty.
    #[error("Missing username")]
    EmptyUsername,
    /// A password directive without a password.
    #[error("No password given for user {0}")]
    MissingPassword(String),
    /// An SSH key directive without key material.
    #[error("No SSH key given for user {0}")]
    MissingKey(String),
    /// Key material spanning several lines would inject extra
    /// `authorized_keys` entries.
    #[error("SSH key for user {0} spans multiple lines")]
    MultilineKey(String),
}

/// One requested account state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountDirective {
    username: String,
    credential: Credential,
    locked: bool,
}

impl AccountDirective {
    /// Create a directive.  The username must not be empty; everything
    /// else about it is checked by the identity store.
    pub fn new(
        username: impl Into<String>,
        credential: Credential,
        locked: bool,
    ) -> Result<Self, MalformedDirectiveError> {
        let username = username.into();
        if username.is_empty() {
            return Err(MalformedDirectiveError::EmptyUsername);
        }
        if let Credential::SshKey(k) = &credential {
            if k.contains(['\n', '\r']) {
                return Err(MalformedDirectiveError::MultilineKey(username));
            }
        }
        Ok(Self {
            username,
            credential,
            locked,
        })
    }

    /// The account name.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The credential to apply.
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Whether password login should be locked.  Ignored for SSH key
    /// directives, which always end up unlocked.
    pub fn locked(&self) -> bool {
        self.locked
    }

    /// A view of this directive that is safe to print.
    pub fn redacted(&self) -> RedactedDirective<'_> {
        RedactedDirective {
            username: &self.username,
            credential: self.credential.kind(),
            key: match &self.credential {
                Credential::SshKey(k) => Some(k.as_str()),
                _ => None,
            },
            locked: self.locked,
        }
    }
}

/// Printable form of a directive without password material.
#[derive(Debug, Serialize)]
pub struct RedactedDirective<'a> {
    /// The account name
    pub username: &'a str,
    /// The credential mode
    pub credential: &'static str,
    /// The public key, for SSH key directives
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<&'a str>,
    /// Requested lock state
    pub locked: bool,
}

/// An input record as found in a directive source, before the
/// credential mode has been decided.
#[derive(Default, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DirectiveRecord {
    /// The account name
    pub username: String,
    /// Password, hash, or (with `is_sshkey`) key material
    #[serde(default)]
    pub password: Option<String>,
    /// Key material given separately from the password
    #[serde(default)]
    pub key: Option<String>,
    /// The password is already hashed
    #[serde(default)]
    pub is_crypted: bool,
    /// Lock password login
    #[serde(default)]
    pub lock: bool,
    /// The account is SSH key only
    #[serde(default)]
    pub is_sshkey: bool,
}

impl std::fmt::Debug for DirectiveRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectiveRecord")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key", &self.key)
            .field("is_crypted", &self.is_crypted)
            .field("lock", &self.lock)
            .field("is_sshkey", &self.is_sshkey)
            .finish()
    }
}

impl TryFrom<DirectiveRecord> for AccountDirective {
    type Error = MalformedDirectiveError;

    /// Key material wins over a password: if `is_sshkey` is set or a
    /// separate `key` is present the record becomes an SSH key directive
    /// and any password is dropped.  Without a separate `key`, the
    /// password field carries the key.
    ///
    /// A blank password would allow logins without one; such accounts
    /// get the disabled hash and are locked instead.
    fn try_from(record: DirectiveRecord) -> Result<Self, Self::Error> {
        let DirectiveRecord {
            username,
            password,
            key,
            is_crypted,
            lock,
            is_sshkey,
        } = record;
        if username.is_empty() {
            return Err(MalformedDirectiveError::EmptyUsername);
        }
        let credential = if is_sshkey || key.is_some() {
            if key.is_some() && password.as_deref().is_some_and(|p| !p.is_empty()) {
                tracing::warn!("Ignoring password for {username}: SSH key takes precedence");
            }
            let key = key
                .or(password)
                .map(|k| k.trim().to_owned())
                .filter(|k| !k.is_empty())
                .ok_or_else(|| MalformedDirectiveError::MissingKey(username.clone()))?;
            Credential::SshKey(key)
        } else {
            let password =
                password.ok_or_else(|| MalformedDirectiveError::MissingPassword(username.clone()))?;
            if password.is_empty() {
                tracing::warn!("Blank password for {username}, locking the account instead");
                return AccountDirective::new(
                    username,
                    Credential::HashedPassword(DISABLED_PASSWORD_HASH.into()),
                    true,
                );
            }
            if is_crypted {
                Credential::HashedPassword(password)
            } else {
                Credential::PlaintextPassword(password)
            }
        };
        AccountDirective::new(username, credential, lock)
    }
}
