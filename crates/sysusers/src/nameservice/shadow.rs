//! Helpers for [shadow password file](https://man7.org/linux/man-pages/man5/shadow.5.html).

use crate::{Error, Result};

/// Entry from shadow file.  Only the fields we look at are broken out;
/// the aging fields after the hash may be missing altogether.
#[derive(Clone, PartialEq, Eq)]
pub struct ShadowEntry {
    /// user name
    pub name: String,
    /// encrypted password, possibly with a `!` lock prefix
    pub password: String,
}

// Hand written so the hash never ends up in logs.
impl std::fmt::Debug for ShadowEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowEntry")
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl ShadowEntry {
    /// Parse a single shadow entry.
    pub fn parse_line(s: &str) -> std::result::Result<Self, String> {
        let mut fields = s.split(':');
        let name = fields.next().unwrap_or_default();
        if name.is_empty() {
            return Err("empty user name".into());
        }
        let password = fields
            .next()
            .ok_or_else(|| "missing password field".to_owned())?;
        Ok(Self {
            name: name.to_owned(),
            password: password.to_owned(),
        })
    }
}

/// Parse the full content of a shadow file.
pub fn parse_shadow_content(content: &str) -> Result<Vec<ShadowEntry>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !super::is_skipped_line(line))
        .map(|(i, line)| {
            ShadowEntry::parse_line(line).map_err(|reason| Error::Parse {
                path: "etc/shadow",
                line: i + 1,
                reason,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lines() {
        let content = indoc::indoc! { r#"
            root:!locked::0:99999:7:::
            alice:$6$salt$hash:19000:0:99999:7:::
            bob:*
            carol::19000
        "# };
        let entries = parse_shadow_content(content).unwrap();
        let summary = entries
            .iter()
            .map(|e| (e.name.as_str(), e.password.as_str()))
            .collect::<Vec<_>>();
        similar_asserts::assert_eq!(
            summary,
            vec![
                ("root", "!locked"),
                ("alice", "$6$salt$hash"),
                ("bob", "*"),
                ("carol", ""),
            ]
        );
    }

    #[test]
    fn test_debug_redacts() {
        let e = ShadowEntry::parse_line("alice:$6$salt$hash:19000:0:99999:7:::").unwrap();
        let s = format!("{e:?}");
        assert!(!s.contains("$6$"), "{s}");
    }

    #[test]
    fn test_parse_invalid() {
        let e = parse_shadow_content("root:!::\nbob\n").unwrap_err();
        assert!(matches!(e, Error::Parse { line: 2, .. }), "{e}");
        assert!(ShadowEntry::parse_line(":*:::::::").is_err());
    }
}
