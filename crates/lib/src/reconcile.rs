//! # Account reconciliation
//!
//! Applies a list of [`AccountDirective`]s to an [`IdentityStore`], one
//! at a time and in order.  For each directive:
//!
//! 1. Ask the store whether the account exists.
//! 2. If it does and the credential is a password or hash, replace the
//!    password and lock state.
//! 3. If it does not, create it.  SSH key accounts are created with the
//!    disabled hash and unlocked.
//! 4. For SSH key directives, set the disabled hash and unlock the
//!    account, then authorize the key.
//!
//! An SSH key account is never left with a usable password, not even
//! between two store calls.  It is also explicitly unlocked: the lock
//! flag gates all authentication on common systems, so the only thing
//! keeping password logins out is the hash.

use serde::{Deserialize, Serialize};

use crate::directive::{AccountDirective, Credential};
use crate::store::{IdentityStore, StoreError};

/// A password hash that no input can produce.  Setting it disables
/// password authentication and leaves other methods working.
pub const DISABLED_PASSWORD_HASH: &str = "*";

/// What to do when a directive fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop at the first failure so a partially provisioned system does
    /// not go unnoticed.
    #[default]
    Abort,
    /// Record the failure and go on with the next directive.
    Continue,
}

/// The identity store call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    /// [`IdentityStore::exists`]
    Exists,
    /// [`IdentityStore::create_user`]
    CreateUser,
    /// [`IdentityStore::set_password`]
    SetPassword,
    /// [`IdentityStore::set_ssh_key`]
    SetSshKey,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Exists => "look up",
            Self::CreateUser => "create",
            Self::SetPassword => "set password of",
            Self::SetSshKey => "install SSH key for",
        };
        f.write_str(s)
    }
}

/// A directive could not be applied.
#[derive(Debug, thiserror::Error)]
#[error("Failed to {operation} user {username}")]
pub struct ReconciliationError {
    /// The account the directive was for
    pub username: String,
    /// The store call that failed
    pub operation: Operation,
    /// Why it failed
    #[source]
    pub cause: StoreError,
}

/// How an account was reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// The account did not exist and was created.
    Created,
    /// The account existed and was updated.
    Updated,
}

/// A directive that was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Applied {
    /// The account
    pub username: String,
    /// What happened to it
    pub action: Action,
    /// Whether an SSH key was authorized
    pub ssh_key: bool,
}

/// The result of a reconciliation run.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Directives applied, in order
    pub applied: Vec<Applied>,
    /// Directives that failed; only ever non-empty with
    /// [`FailurePolicy::Continue`]
    pub failures: Vec<ReconciliationError>,
}

impl ReconcileReport {
    /// Whether every directive was applied.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Applies directives to a store.
pub struct Reconciler<'s, S: ?Sized> {
    store: &'s mut S,
    policy: FailurePolicy,
}

impl<S: ?Sized> std::fmt::Debug for Reconciler<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<'s, S: IdentityStore + ?Sized> Reconciler<'s, S> {
    /// Create a reconciler with the default [`FailurePolicy::Abort`].
    pub fn new(store: &'s mut S) -> Self {
        Self {
            store,
            policy: FailurePolicy::default(),
        }
    }

    /// Set the failure policy.
    pub fn policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Apply every directive in order.
    ///
    /// With [`FailurePolicy::Abort`] the first failure is returned and
    /// later directives are not attempted.  With
    /// [`FailurePolicy::Continue`] failures are collected in the report.
    pub fn reconcile(
        &mut self,
        directives: impl IntoIterator<Item = AccountDirective>,
    ) -> Result<ReconcileReport, ReconciliationError> {
        let mut report = ReconcileReport::default();
        for directive in directives {
            match self.apply(&directive) {
                Ok(applied) => {
                    tracing::info!(
                        "{} account {}{}",
                        match applied.action {
                            Action::Created => "Created",
                            Action::Updated => "Updated",
                        },
                        applied.username,
                        if applied.ssh_key { " (SSH key only)" } else { "" }
                    );
                    report.applied.push(applied);
                }
                Err(e) => match self.policy {
                    FailurePolicy::Abort => return Err(e),
                    FailurePolicy::Continue => {
                        let chain = anyhow::Chain::new(&e)
                            .map(ToString::to_string)
                            .collect::<Vec<_>>();
                        tracing::error!("{}", chain.join(": "));
                        report.failures.push(e);
                    }
                },
            }
        }
        Ok(report)
    }

    fn apply(&mut self, directive: &AccountDirective) -> Result<Applied, ReconciliationError> {
        let username = directive.username();
        let _span = tracing::debug_span!("account", username).entered();
        let failed = |operation| {
            move |cause| ReconciliationError {
                username: username.to_owned(),
                operation,
                cause,
            }
        };
        let locked = directive.locked();

        let exists = self
            .store
            .exists(username)
            .map_err(failed(Operation::Exists))?;
        let action = if exists {
            tracing::debug!("Account exists");
            let r = match directive.credential() {
                Credential::PlaintextPassword(p) => self.store.set_password(username, p, false, locked),
                Credential::HashedPassword(h) => self.store.set_password(username, h, true, locked),
                // Handled below
                Credential::SshKey(_) => Ok(()),
            };
            r.map_err(failed(Operation::SetPassword))?;
            Action::Updated
        } else {
            tracing::debug!("Account does not exist");
            let (password, is_hashed, locked) = match directive.credential() {
                Credential::PlaintextPassword(p) => (p.as_str(), false, locked),
                Credential::HashedPassword(h) => (h.as_str(), true, locked),
                Credential::SshKey(_) => (DISABLED_PASSWORD_HASH, true, false),
            };
            self.store
                .create_user(username, password, is_hashed, locked)
                .map_err(failed(Operation::CreateUser))?;
            Action::Created
        };

        let ssh_key = if let Credential::SshKey(key) = directive.credential() {
            self.store
                .set_password(username, DISABLED_PASSWORD_HASH, true, false)
                .map_err(failed(Operation::SetPassword))?;
            self.store
                .set_ssh_key(username, key)
                .map_err(failed(Operation::SetSshKey))?;
            true
        } else {
            false
        };

        Ok(Applied {
            username: username.to_owned(),
            action,
            ssh_key,
        })
    }
}

/// Apply `directives` to `store`, stopping at the first failure.
pub fn reconcile<S: IdentityStore + ?Sized>(
    directives: impl IntoIterator<Item = AccountDirective>,
    store: &mut S,
) -> Result<ReconcileReport, ReconciliationError> {
    Reconciler::new(store).reconcile(directives)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{Call, MemoryStore};

    fn plain(u: &str, p: &str, locked: bool) -> AccountDirective {
        AccountDirective::new(u, Credential::PlaintextPassword(p.into()), locked).unwrap()
    }

    fn hashed(u: &str, h: &str, locked: bool) -> AccountDirective {
        AccountDirective::new(u, Credential::HashedPassword(h.into()), locked).unwrap()
    }

    fn sshkey(u: &str, k: &str, locked: bool) -> AccountDirective {
        AccountDirective::new(u, Credential::SshKey(k.into()), locked).unwrap()
    }

    fn create(u: &str, p: &str, hashed: bool, locked: bool) -> Call {
        Call::CreateUser(u.into(), p.into(), hashed, locked)
    }

    fn setpw(u: &str, p: &str, hashed: bool, locked: bool) -> Call {
        Call::SetPassword(u.into(), p.into(), hashed, locked)
    }

    #[test]
    fn test_empty() {
        let mut store = MemoryStore::default();
        let report = reconcile(Vec::new(), &mut store).unwrap();
        assert!(report.is_success());
        assert!(report.applied.is_empty());
        assert!(store.calls().is_empty());
    }

    #[test]
    fn test_create_plaintext() {
        let mut store = MemoryStore::default();
        let report = reconcile([plain("alice", "plain123", false)], &mut store).unwrap();
        similar_asserts::assert_eq!(
            store.calls(),
            vec![Call::Exists("alice".into()), create("alice", "plain123", false, false)]
        );
        similar_asserts::assert_eq!(
            report.applied,
            vec![Applied {
                username: "alice".into(),
                action: Action::Created,
                ssh_key: false
            }]
        );
    }

    #[test]
    fn test_password_directives() {
        // Absent: exactly one create, never a key.  Present: exactly one
        // set_password, never a create.
        for (d, exists) in [
            (plain("u", "pw", true), false),
            (hashed("u", "$6$a$b", false), false),
            (hashed("u", "$6$a$b", true), true),
            (plain("u", "pw", false), true),
        ] {
            let mut store = if exists {
                MemoryStore::with_users(["u"])
            } else {
                MemoryStore::default()
            };
            let (p, h) = match d.credential() {
                Credential::PlaintextPassword(p) => (p.clone(), false),
                Credential::HashedPassword(p) => (p.clone(), true),
                Credential::SshKey(_) => unreachable!(),
            };
            let locked = d.locked();
            reconcile([d], &mut store).unwrap();
            let expected = if exists {
                setpw("u", &p, h, locked)
            } else {
                create("u", &p, h, locked)
            };
            similar_asserts::assert_eq!(store.mutations(), vec![expected]);
            let a = store.account("u");
            assert_eq!(a.password, p);
            assert_eq!(a.is_hashed, h);
            assert_eq!(a.locked, locked);
            assert!(a.keys.is_empty());
        }
    }

    #[test]
    fn test_sshkey_existing() {
        let key = "ssh-ed25519 AAAA... bob@example.com";
        let mut store = MemoryStore::with_users(["bob"]);
        reconcile([sshkey("bob", key, false)], &mut store).unwrap();
        similar_asserts::assert_eq!(
            store.calls(),
            vec![
                Call::Exists("bob".into()),
                setpw("bob", "*", true, false),
                Call::SetSshKey("bob".into(), key.into()),
            ]
        );
    }

    #[test]
    fn test_sshkey_new_ignores_lock() {
        let mut store = MemoryStore::default();
        let report = reconcile([sshkey("carol", "ssh-rsa CCCC", true)], &mut store).unwrap();
        similar_asserts::assert_eq!(
            store.mutations(),
            vec![
                create("carol", "*", true, false),
                setpw("carol", "*", true, false),
                Call::SetSshKey("carol".into(), "ssh-rsa CCCC".into()),
            ]
        );
        let a = store.account("carol");
        assert_eq!(a.password, DISABLED_PASSWORD_HASH);
        assert!(a.is_hashed);
        assert!(!a.locked);
        assert_eq!(a.keys, ["ssh-rsa CCCC"]);
        assert!(report.applied[0].ssh_key);
    }

    #[test]
    fn test_sshkey_unlocks_locked_account() {
        let mut store = MemoryStore::default();
        let directives = [
            hashed("dave", "$6$a$b", true),
            sshkey("dave", "ssh-ed25519 DDDD", true),
        ];
        reconcile(directives, &mut store).unwrap();
        let a = store.account("dave");
        assert_eq!(a.password, DISABLED_PASSWORD_HASH);
        assert!(!a.locked);
    }

    #[test]
    fn test_later_directive_wins() {
        let mut store = MemoryStore::default();
        let directives = [hashed("erin", "A", false), sshkey("erin", "ssh-rsa K", false)];
        let report = reconcile(directives, &mut store).unwrap();
        let a = store.account("erin");
        assert_eq!(a.keys, ["ssh-rsa K"]);
        assert_eq!(a.password, "*");
        assert_ne!(a.password, "A");
        let actions = report.applied.iter().map(|a| a.action).collect::<Vec<_>>();
        assert_eq!(actions, [Action::Created, Action::Updated]);

        // And the other way around, the password comes back
        let directives = [sshkey("erin", "ssh-rsa K", false), plain("erin", "B", true)];
        reconcile(directives, &mut store).unwrap();
        let a = store.account("erin");
        assert_eq!(a.password, "B");
        assert!(a.locked);
    }

    #[test]
    fn test_idempotent() {
        let directives = || {
            [
                plain("alice", "plain123", false),
                hashed("carol", "$6$c$c", true),
                sshkey("bob", "ssh-ed25519 BBBB", false),
            ]
        };
        let mut store = MemoryStore::with_users(["root"]);
        reconcile(directives(), &mut store).unwrap();
        let once = store.accounts.clone();
        store.take_calls();

        let report = reconcile(directives(), &mut store).unwrap();
        similar_asserts::assert_eq!(store.accounts, once);
        assert!(report.applied.iter().all(|a| a.action == Action::Updated));
        for c in store.calls() {
            assert!(!matches!(c, Call::CreateUser(..)), "{c:?}");
        }
    }

    #[test]
    fn test_abort_on_failure() {
        let mut store = MemoryStore::default().fail_on("create_user", "bob");
        let directives = [
            plain("alice", "a", false),
            sshkey("bob", "ssh-rsa B", false),
            plain("carol", "c", false),
        ];
        let e = reconcile(directives, &mut store).unwrap_err();
        assert_eq!(e.username, "bob");
        assert_eq!(e.operation, Operation::CreateUser);
        assert_eq!(e.to_string(), "Failed to create user bob");
        // Remaining steps for bob and later directives were not attempted
        similar_asserts::assert_eq!(
            store.calls(),
            vec![
                Call::Exists("alice".into()),
                create("alice", "a", false, false),
                Call::Exists("bob".into()),
                create("bob", "*", true, false),
            ]
        );
        assert!(store.accounts.contains_key("alice"));
        assert!(!store.accounts.contains_key("carol"));
        assert_eq!(
            format!("{:#}", anyhow::Error::new(e)),
            "Failed to create user bob: injected create_user failure"
        );
    }

    #[test]
    fn test_lookup_failure() {
        let mut store = MemoryStore::with_users(["alice"]).fail_on("exists", "alice");
        let e = reconcile([plain("alice", "pw", false)], &mut store).unwrap_err();
        assert_eq!(e.operation, Operation::Exists);
        assert_eq!(e.to_string(), "Failed to look up user alice");
        // Nothing else was attempted for the account
        similar_asserts::assert_eq!(store.calls(), vec![Call::Exists("alice".into())]);
        assert!(store.account("alice").password.is_empty());
    }

    #[test]
    fn test_blank_kickstart_password() {
        let directives = crate::source::parse_directives(
            "sshpw --username=alice --plaintext \"\"\n",
            crate::source::SourceFormat::Kickstart,
        )
        .unwrap();
        let mut store = MemoryStore::default();
        reconcile(directives, &mut store).unwrap();
        similar_asserts::assert_eq!(
            store.calls(),
            vec![Call::Exists("alice".into()), create("alice", "*", true, true)]
        );
    }

    #[test]
    fn test_continue_on_failure() {
        let mut store = MemoryStore::with_users(["bob"]).fail_on("set_ssh_key", "bob");
        let directives = [
            sshkey("bob", "ssh-rsa B", false),
            // Refused by the store's name validation
            plain("not valid", "x", false),
            plain("carol", "c", false),
        ];
        let report = Reconciler::new(&mut store)
            .policy(FailurePolicy::Continue)
            .reconcile(directives)
            .unwrap();
        assert!(!report.is_success());
        let failures = report
            .failures
            .iter()
            .map(|e| (e.username.as_str(), e.operation))
            .collect::<Vec<_>>();
        assert_eq!(
            failures,
            [("bob", Operation::SetSshKey), ("not valid", Operation::CreateUser)]
        );
        assert!(matches!(report.failures[1].cause, StoreError::InvalidUsername(_)));
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.applied[0].username, "carol");
        // The password was already disabled before the key failed
        assert_eq!(store.account("bob").password, "*");
    }
}
