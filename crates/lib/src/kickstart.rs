//! # Extracting account commands from a kickstart file
//!
//! Only the `sshpw` and `sshkey` commands are interpreted; every other
//! command is left to the installer.  Script and package sections are skipped whole so
//! that text inside e.g. a `%post` script is never mistaken for a
//! command.

use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use fn_error_context::context;

use crate::directive::DirectiveRecord;

const SSHPW: &str = "sshpw";
const SSHKEY: &str = "sshkey";
const SECTION_END: &str = "%end";

/// Parse the arguments following `sshpw` or `sshkey` on one line.
/// `sshkey` only takes `--username` and the key.
fn parse_command_args(cmd: &str, args: &[String]) -> Result<DirectiveRecord> {
    let mut record = DirectiveRecord::default();
    let mut username = None;
    let mut material = None;
    let mut args = args.iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--iscrypted" if cmd == SSHPW => record.is_crypted = true,
            "--plaintext" if cmd == SSHPW => record.is_crypted = false,
            "--lock" if cmd == SSHPW => record.lock = true,
            "--sshkey" if cmd == SSHPW => record.is_sshkey = true,
            "--username" => {
                let v = args
                    .next()
                    .ok_or_else(|| anyhow!("Option --username requires a value"))?;
                username = Some(v.clone());
            }
            o if o.starts_with("--username=") => {
                username = Some(o["--username=".len()..].to_owned());
            }
            o if o.starts_with("--") => anyhow::bail!("Unknown option {o}"),
            v => {
                if material.is_some() {
                    anyhow::bail!("A single password or key argument is expected");
                }
                material = Some(v.to_owned());
            }
        }
    }
    record.username = username.ok_or_else(|| anyhow!("Missing required option --username"))?;
    if cmd == SSHKEY {
        record.key = material;
    } else {
        record.password = material;
    }
    Ok(record)
}

/// Find every `sshpw` and `sshkey` command in `content`, in order,
/// paired with its one-based line number.
#[context("Parsing kickstart")]
pub fn parse_account_commands(content: &str) -> Result<Vec<(usize, DirectiveRecord)>> {
    let mut r = Vec::new();
    let mut seen = HashSet::new();
    let mut section: Option<&str> = None;
    for (i, line) in content.lines().enumerate() {
        let lineno = i + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some(name) = section {
            if trimmed == SECTION_END {
                tracing::trace!("Leaving section {name} at line {lineno}");
                section = None;
            }
            continue;
        }
        if trimmed.starts_with('%') {
            let name = trimmed.split_whitespace().next().unwrap_or(trimmed);
            match name {
                SECTION_END => tracing::warn!("Ignoring stray {SECTION_END} on line {lineno}"),
                "%include" | "%ksappend" => {
                    tracing::warn!("Not following {name} on line {lineno}")
                }
                _ => section = Some(name),
            }
            continue;
        }
        let words = shlex::split(trimmed)
            .ok_or_else(|| anyhow!("Unbalanced quoting on line {lineno}"))?;
        let Some((cmd, args)) = words.split_first() else {
            continue;
        };
        let cmd = cmd.as_str();
        if cmd != SSHPW && cmd != SSHKEY {
            continue;
        }
        let record = parse_command_args(cmd, args)
            .with_context(|| format!("Parsing {cmd} on line {lineno}"))?;
        // Adding keys to an account is expected, defining it twice is not
        if cmd == SSHPW && !seen.insert(record.username.clone()) {
            tracing::warn!(
                "An ssh user with the name {} has already been defined (line {lineno})",
                record.username
            );
        }
        r.push((lineno, record));
    }
    if let Some(name) = section {
        tracing::warn!("Section {name} is not terminated by {SECTION_END}");
    }
    Ok(r)
}
