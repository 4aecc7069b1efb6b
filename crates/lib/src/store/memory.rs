//! An in-memory identity store that records every call, for tests.

use std::cell::RefCell;
use std::collections::BTreeMap;

use super::{check_credential_args, check_ssh_key_args, IdentityStore, StoreError};

// Only ever compared as a whole.
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Exists(String),
    CreateUser(String, String, bool, bool),
    SetPassword(String, String, bool, bool),
    SetSshKey(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct Account {
    pub(crate) password: String,
    pub(crate) is_hashed: bool,
    pub(crate) locked: bool,
    pub(crate) keys: Vec<String>,
}

#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    pub(crate) accounts: BTreeMap<String, Account>,
    calls: RefCell<Vec<Call>>,
    /// Fail the named operation (`create_user`, ...) for this user.
    fail: Option<(&'static str, String)>,
}

impl MemoryStore {
    pub(crate) fn with_users<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let accounts = names
            .into_iter()
            .map(|n| (n.to_owned(), Account::default()))
            .collect();
        Self {
            accounts,
            ..Default::default()
        }
    }

    pub(crate) fn fail_on(mut self, op: &'static str, username: &str) -> Self {
        self.fail = Some((op, username.to_owned()));
        self
    }

    pub(crate) fn account(&self, username: &str) -> &Account {
        &self.accounts[username]
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub(crate) fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.borrow_mut())
    }

    /// Every recorded call except existence checks.
    pub(crate) fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::Exists(_)))
            .collect()
    }

    fn check_fail(&self, op: &'static str, username: &str) -> Result<(), StoreError> {
        match &self.fail {
            Some((o, u)) if *o == op && u == username => Err(StoreError::Command(
                anyhow::anyhow!("injected {op} failure"),
            )),
            _ => Ok(()),
        }
    }

    fn account_mut(&mut self, username: &str) -> Result<&mut Account, StoreError> {
        self.accounts
            .get_mut(username)
            .ok_or_else(|| StoreError::NoSuchUser(username.to_owned()))
    }
}

impl IdentityStore for MemoryStore {
    fn exists(&self, username: &str) -> Result<bool, StoreError> {
        self.calls.borrow_mut().push(Call::Exists(username.into()));
        self.check_fail("exists", username)?;
        Ok(self.accounts.contains_key(username))
    }

    fn create_user(
        &mut self,
        username: &str,
        password: &str,
        is_hashed: bool,
        locked: bool,
    ) -> Result<(), StoreError> {
        self.calls.borrow_mut().push(Call::CreateUser(
            username.into(),
            password.into(),
            is_hashed,
            locked,
        ));
        check_credential_args(username, password, is_hashed)?;
        self.check_fail("create_user", username)?;
        if self.accounts.contains_key(username) {
            return Err(StoreError::Command(anyhow::anyhow!(
                "user '{username}' already exists"
            )));
        }
        self.accounts.insert(
            username.into(),
            Account {
                password: password.into(),
                is_hashed,
                locked,
                keys: Vec::new(),
            },
        );
        Ok(())
    }

    fn set_password(
        &mut self,
        username: &str,
        password: &str,
        is_hashed: bool,
        locked: bool,
    ) -> Result<(), StoreError> {
        self.calls.borrow_mut().push(Call::SetPassword(
            username.into(),
            password.into(),
            is_hashed,
            locked,
        ));
        check_credential_args(username, password, is_hashed)?;
        self.check_fail("set_password", username)?;
        let a = self.account_mut(username)?;
        a.password = password.into();
        a.is_hashed = is_hashed;
        a.locked = locked;
        Ok(())
    }

    fn set_ssh_key(&mut self, username: &str, key: &str) -> Result<(), StoreError> {
        self.calls
            .borrow_mut()
            .push(Call::SetSshKey(username.into(), key.into()));
        check_ssh_key_args(username, key)?;
        self.check_fail("set_ssh_key", username)?;
        let a = self.account_mut(username)?;
        if !a.keys.iter().any(|k| k == key) {
            a.keys.push(key.into());
        }
        Ok(())
    }
}
