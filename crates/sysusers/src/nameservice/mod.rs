//! Parsers for the colon-separated files of the shadow-utils user database.

pub mod passwd;
pub mod shadow;

/// Whether a line carries no entry: blank, a comment, or an NIS
/// compat marker (`+`/`-`) which we cannot resolve offline.
pub(crate) fn is_skipped_line(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.starts_with('#') || line.starts_with('+') || line.starts_with('-')
}
