//! Helpers for [password file](https://man7.org/linux/man-pages/man5/passwd.5.html).

use crate::{Error, Result};

/// Entry from passwd file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    /// user name
    pub name: String,
    /// user password (normally `x`, the hash lives in shadow)
    pub passwd: String,
    /// user ID
    pub uid: u32,
    /// group ID
    pub gid: u32,
    /// user full name or comment
    pub gecos: String,
    /// home directory
    pub home_dir: String,
    /// login shell
    pub shell: String,
}

impl PasswdEntry {
    /// Parse a single passwd entry.
    pub fn parse_line(s: impl AsRef<str>) -> std::result::Result<Self, String> {
        let mut parts = s.as_ref().splitn(7, ':');
        let mut next = |field: &str| {
            parts
                .next()
                .map(str::to_owned)
                .ok_or_else(|| format!("missing {field}"))
        };
        let name = next("name")?;
        let passwd = next("password")?;
        let uid = next("uid")?;
        let gid = next("gid")?;
        let entry = Self {
            name,
            passwd,
            uid: uid.parse().map_err(|_| format!("invalid uid {uid:?}"))?,
            gid: gid.parse().map_err(|_| format!("invalid gid {gid:?}"))?,
            gecos: next("gecos")?,
            home_dir: next("home directory")?,
            shell: next("shell")?,
        };
        if entry.name.is_empty() {
            return Err("empty user name".into());
        }
        Ok(entry)
    }

    /// The home directory relative to the root the entry was read from,
    /// suitable for use with a directory handle on that root.
    pub fn home_dir_relative(&self) -> &str {
        self.home_dir.trim_start_matches('/')
    }
}

/// Parse the full content of a passwd file.
pub fn parse_passwd_content(content: &str) -> Result<Vec<PasswdEntry>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !super::is_skipped_line(line))
        .map(|(i, line)| {
            PasswdEntry::parse_line(line).map_err(|reason| Error::Parse {
                path: "etc/passwd",
                line: i + 1,
                reason,
            })
        })
        .collect()
}
