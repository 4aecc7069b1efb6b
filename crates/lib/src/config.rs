//! # Configuration drop-ins
//!
//! TOML files named `*.toml` in `ksaccounts/config.d` under the usual
//! systemd search path are merged in filename order; for the same name,
//! a later base directory masks an earlier one.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use serde::Deserialize;

use crate::reconcile::FailurePolicy;

const SYSTEMD_CONVENTIONAL_BASES: &[&str] = &["/usr/lib", "/usr/local/lib", "/etc", "/run"];
const CONFIG_D: &str = "ksaccounts/config.d";
const DEFAULT_ROOT: &str = "/";

/// Types whose values can be overlaid by a later drop-in.
pub(crate) trait Mergeable {
    fn merge(&mut self, other: Self);
}

impl<T> Mergeable for Option<T> {
    fn merge(&mut self, other: Self) {
        if let Some(other) = other {
            *self = Some(other);
        }
    }
}

/// The `[accounts]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AccountsConfig {
    /// Target root holding the user database
    pub root: Option<Utf8PathBuf>,
    /// What to do when a directive fails
    pub on_error: Option<FailurePolicy>,
    /// Whether new accounts get a home directory
    pub create_home: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    accounts: Option<AccountsConfig>,
}

impl Mergeable for AccountsConfig {
    fn merge(&mut self, other: Self) {
        self.root.merge(other.root);
        self.on_error.merge(other.on_error);
        self.create_home.merge(other.create_home);
    }
}

impl AccountsConfig {
    /// The target root, `/` unless configured.
    pub fn root(&self) -> &Utf8Path {
        self.root
            .as_deref()
            .unwrap_or_else(|| Utf8Path::new(DEFAULT_ROOT))
    }

    /// The failure policy, [`FailurePolicy::Abort`] unless configured.
    pub fn on_error(&self) -> FailurePolicy {
        self.on_error.unwrap_or_default()
    }

    /// Whether to create home directories, true unless configured.
    pub fn create_home(&self) -> bool {
        self.create_home.unwrap_or(true)
    }
}

fn parse_config(buf: &str) -> Result<AccountsConfig> {
    let c: ConfigFile = toml::from_str(buf)?;
    Ok(c.accounts.unwrap_or_default())
}

/// Overlay drop-in contents, in order.
fn merge_configs<'a>(
    fragments: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<AccountsConfig> {
    let mut config = AccountsConfig::default();
    for (name, buf) in fragments {
        let c = parse_config(buf).with_context(|| format!("Parsing {name}"))?;
        tracing::debug!("Merging config {name}: {c:?}");
        config.merge(c);
    }
    Ok(config)
}

/// Load the merged configuration from the system drop-in directories.
/// Without any drop-ins, every setting has its default.
#[context("Loading configuration")]
pub fn load_config() -> Result<AccountsConfig> {
    let fragments = liboverdrop::scan(SYSTEMD_CONVENTIONAL_BASES, CONFIG_D, &["toml"], true);
    let mut contents = Vec::new();
    for (_name, path) in fragments {
        let buf = std::fs::read_to_string(&path)
            .with_context(|| format!("Reading {}", path.display()))?;
        contents.push((path.display().to_string(), buf));
    }
    merge_configs(contents.iter().map(|(n, b)| (n.as_str(), b.as_str())))
}
