use std::collections::HashSet;

use super::{check_credential_args, check_ssh_key_args, IdentityStore, StoreError};

/// A store that reads from another store but only records the changes
/// it is asked to make.
#[derive(Debug)]
pub struct DryRunStore<S> {
    inner: S,
    created: HashSet<String>,
    planned: Vec<String>,
}

fn describe_password(is_hashed: bool, locked: bool) -> String {
    let kind = if is_hashed { "hashed" } else { "plaintext" };
    let lock = if locked { "locked" } else { "unlocked" };
    format!("{kind} password, {lock}")
}

impl<S: IdentityStore> DryRunStore<S> {
    /// Wrap `inner`.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            created: HashSet::new(),
            planned: Vec::new(),
        }
    }

    /// The changes that would have been made, in order.
    pub fn planned(&self) -> &[String] {
        &self.planned
    }

    fn plan(&mut self, step: String) {
        tracing::info!("Would {step}");
        self.planned.push(step);
    }
}

impl<S: IdentityStore> IdentityStore for DryRunStore<S> {
    fn exists(&self, username: &str) -> Result<bool, StoreError> {
        if self.created.contains(username) {
            return Ok(true);
        }
        self.inner.exists(username)
    }

    fn create_user(
        &mut self,
        username: &str,
        password: &str,
        is_hashed: bool,
        locked: bool,
    ) -> Result<(), StoreError> {
        check_credential_args(username, password, is_hashed)?;
        self.plan(format!(
            "create user {username} ({})",
            describe_password(is_hashed, locked)
        ));
        self.created.insert(username.to_owned());
        Ok(())
    }

    fn set_password(
        &mut self,
        username: &str,
        password: &str,
        is_hashed: bool,
        locked: bool,
    ) -> Result<(), StoreError> {
        check_credential_args(username, password, is_hashed)?;
        self.plan(format!(
            "set password of {username} ({})",
            describe_password(is_hashed, locked)
        ));
        Ok(())
    }

    fn set_ssh_key(&mut self, username: &str, key: &str) -> Result<(), StoreError> {
        check_ssh_key_args(username, key)?;
        self.plan(format!("authorize SSH key for {username}: {}", key.trim()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[test]
    fn test_dry_run() {
        let inner = MemoryStore::with_users(["root"]);
        let mut store = DryRunStore::new(inner);
        assert!(store.exists("root").unwrap());
        assert!(!store.exists("alice").unwrap());
        store.create_user("alice", "secret", false, true).unwrap();
        assert!(store.exists("alice").unwrap());
        store.set_password("root", "*", true, false).unwrap();
        store.set_ssh_key("root", "ssh-ed25519 AAAA").unwrap();
        assert_eq!(
            store.planned(),
            [
                "create user alice (plaintext password, locked)",
                "set password of root (hashed password, unlocked)",
                "authorize SSH key for root: ssh-ed25519 AAAA",
            ]
        );
        // Nothing reached the real store
        assert!(!store.inner.exists("alice").unwrap());
        assert!(store.inner.mutations().is_empty());
    }
}
