//! Loading account directives from their on-disk formats.

use anyhow::{Context, Result};
use camino::Utf8Path;
use fn_error_context::context;

use crate::directive::{AccountDirective, DirectiveRecord};
use crate::kickstart;

/// Where the installer leaves the kickstart it was started with.
pub const DEFAULT_KICKSTART: &str = "/run/install/ks.cfg";

/// The format of a directive source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SourceFormat {
    /// `sshpw` and `sshkey` commands in a kickstart file
    #[default]
    Kickstart,
    /// A JSON array of directive records
    Json,
}

/// Parse directives from `content`.
pub fn parse_directives(content: &str, format: SourceFormat) -> Result<Vec<AccountDirective>> {
    match format {
        SourceFormat::Kickstart => kickstart::parse_account_commands(content)?
            .into_iter()
            .map(|(lineno, record)| {
                AccountDirective::try_from(record)
                    .with_context(|| format!("Invalid kickstart command on line {lineno}"))
            })
            .collect(),
        SourceFormat::Json => {
            let records: Vec<DirectiveRecord> =
                serde_json::from_str(content).context("Parsing JSON directives")?;
            records
                .into_iter()
                .enumerate()
                .map(|(i, record)| {
                    AccountDirective::try_from(record)
                        .with_context(|| format!("Invalid directive at index {i}"))
                })
                .collect()
        }
    }
}

/// Read and parse directives from `path`.  A missing file is an error;
/// deciding whether that matters is up to the caller.
#[context("Loading directives from {path}")]
pub fn load_directives(path: &Utf8Path, format: SourceFormat) -> Result<Vec<AccountDirective>> {
    let content = std::fs::read_to_string(path)?;
    parse_directives(&content, format)
}
