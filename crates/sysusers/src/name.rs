use std::sync::OnceLock;

use regex::Regex;

/// Longest name `useradd` accepts by default.
pub const MAX_USERNAME_LEN: usize = 32;

/// A user name that shadow-utils would refuse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid user name {name:?}: {reason}")]
pub struct InvalidUsername {
    /// The rejected name
    pub name: String,
    /// Which rule it broke
    pub reason: &'static str,
}

/// Check a user name against the rules `useradd` applies, so that we
/// fail with a clear message before running any tool.
pub fn validate_username(name: &str) -> Result<(), InvalidUsername> {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = REGEX.get_or_init(|| Regex::new(r"^[A-Za-z0-9._][A-Za-z0-9._-]*\$?$").unwrap());
    let err = |reason| {
        Err(InvalidUsername {
            name: name.to_owned(),
            reason,
        })
    };
    if name.is_empty() {
        return err("name is empty");
    }
    if name.len() > MAX_USERNAME_LEN {
        return err("name is longer than 32 characters");
    }
    if name == "." || name == ".." {
        return err("name is a reserved path component");
    }
    if name.starts_with('-') {
        return err("name starts with '-'");
    }
    if name.chars().all(|c| c.is_ascii_digit()) {
        return err("name is fully numeric");
    }
    if !regex.is_match(name) {
        return err("name contains invalid characters");
    }
    Ok(())
}
