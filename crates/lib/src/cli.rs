//! # Command line interface
//!
//! Command line tool to apply kickstart `sshpw` account directives to a
//! target system.

use std::ffi::OsString;
use std::io::Write;

use anyhow::{ensure, Context, Result};
use camino::Utf8PathBuf;
use cap_std_ext::cap_std::fs::Dir;
use clap::Parser;
use fn_error_context::context;
use ksaccounts_sysusers::{PasswordState, UserDb};
use ksaccounts_utils::ResultExt;
use serde::Serialize;

use crate::config::{load_config, AccountsConfig};
use crate::reconcile::{FailurePolicy, ReconcileReport, Reconciler};
use crate::source::{load_directives, SourceFormat, DEFAULT_KICKSTART};
use crate::store::{authorized_keys, DryRunStore, IdentityStore, ShadowUtilsStore};

/// Options shared by commands that read directives.
#[derive(Debug, clap::Args, PartialEq, Eq)]
pub(crate) struct SourceOpts {
    /// Format of the input
    #[clap(long, value_enum, default_value_t)]
    pub(crate) format: SourceFormat,

    /// File to read directives from
    #[clap(default_value = DEFAULT_KICKSTART)]
    pub(crate) input: Utf8PathBuf,
}

/// Perform account changes on a target root.
#[derive(Debug, clap::Args, PartialEq, Eq)]
pub(crate) struct ApplyOpts {
    /// The root of the system whose accounts are changed
    #[clap(long)]
    pub(crate) root: Option<Utf8PathBuf>,

    /// Only print what would be changed
    #[clap(long)]
    pub(crate) dry_run: bool,

    /// Go on with later directives when one fails
    #[clap(long)]
    pub(crate) continue_on_error: bool,

    #[clap(flatten)]
    pub(crate) source: SourceOpts,
}

/// Display the accounts of a target root.
#[derive(Debug, clap::Args, PartialEq, Eq)]
pub(crate) struct ShowOpts {
    /// The root of the system to inspect
    #[clap(long)]
    pub(crate) root: Option<Utf8PathBuf>,

    /// Output in JSON format
    #[clap(long)]
    pub(crate) json: bool,
}

/// Create and update user accounts from installer directives.
#[derive(Debug, Parser, PartialEq, Eq)]
#[clap(name = "ksaccounts")]
#[clap(rename_all = "kebab-case")]
#[clap(version)]
pub(crate) enum Opt {
    /// Apply account directives to the target root.
    ///
    /// Accounts that exist get their password and lock state replaced;
    /// missing accounts are created.  Directives with an SSH key leave
    /// the account with password logins disabled and the key authorized.
    Apply(ApplyOpts),
    /// Parse directives and print them as JSON, with passwords removed.
    Parse(SourceOpts),
    /// Display the accounts of the target root and their credentials.
    Show(ShowOpts),
}

/// Parse the provided arguments and execute.
/// Calls [`clap::Error::exit`] on failure, printing the error message and aborting the program.
pub fn run_from_iter<I>(args: I) -> Result<()>
where
    I: IntoIterator,
    I::Item: Into<OsString> + Clone,
{
    run_from_opt(Opt::parse_from(args))
}

fn run_from_opt(opt: Opt) -> Result<()> {
    match opt {
        Opt::Apply(opts) => {
            let config = load_config()?;
            let report = apply(&opts, &config)?;
            let failed = report.failures.len();
            ensure!(
                failed == 0,
                "Failed to apply {failed} of {} directives",
                failed + report.applied.len()
            );
            Ok(())
        }
        Opt::Parse(opts) => {
            let directives = load_directives(&opts.input, opts.format)?;
            let redacted = directives.iter().map(|d| d.redacted()).collect::<Vec<_>>();
            let mut out = std::io::stdout().lock();
            serde_json::to_writer_pretty(&mut out, &redacted)?;
            writeln!(out)?;
            Ok(())
        }
        Opt::Show(opts) => {
            let config = load_config()?;
            let root = opts.root.as_deref().unwrap_or(config.root());
            let store = ShadowUtilsStore::open(root, config.create_home())?;
            let accounts = list_accounts(store.root())?;
            let mut out = std::io::stdout().lock();
            if opts.json {
                serde_json::to_writer_pretty(&mut out, &accounts)?;
                writeln!(out)?;
            } else {
                print_accounts(&accounts, &mut out)?;
            }
            Ok(())
        }
    }
}

fn apply(opts: &ApplyOpts, config: &AccountsConfig) -> Result<ReconcileReport> {
    if !opts.dry_run {
        ensure!(
            rustix::process::getuid().is_root(),
            "Must run as the root user"
        );
    }
    let policy = if opts.continue_on_error {
        FailurePolicy::Continue
    } else {
        config.on_error()
    };
    let root = opts.root.as_deref().unwrap_or(config.root());

    let directives = load_directives(&opts.source.input, opts.source.format)?;
    if directives.is_empty() {
        tracing::info!("No account directives in {}", opts.source.input);
        return Ok(ReconcileReport::default());
    }
    tracing::debug!("Applying {} directives to {root}", directives.len());

    let mut store = ShadowUtilsStore::open(root, config.create_home())?;
    if opts.dry_run {
        let mut store = DryRunStore::new(store);
        let report = reconcile_with(&mut store, policy, directives)?;
        let mut out = std::io::stdout().lock();
        for step in store.planned() {
            writeln!(out, "Would {step}")?;
        }
        Ok(report)
    } else {
        reconcile_with(&mut store, policy, directives)
    }
}

fn reconcile_with<S: IdentityStore>(
    store: &mut S,
    policy: FailurePolicy,
    directives: Vec<crate::directive::AccountDirective>,
) -> Result<ReconcileReport> {
    let report = Reconciler::new(store)
        .policy(policy)
        .reconcile(directives)?;
    Ok(report)
}

/// An account of the target root, as shown by `ksaccounts show`.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
struct AccountSummary {
    name: String,
    uid: u32,
    home: String,
    password: PasswordState,
    ssh_keys: usize,
}

#[context("Listing accounts")]
fn list_accounts(root: &Dir) -> Result<Vec<AccountSummary>> {
    let db = UserDb::load(root)?;
    let r = db
        .users()
        .map(|user| {
            let ssh_keys = authorized_keys(root, user)
                .with_context(|| format!("Reading SSH keys of {}", user.name))
                .log_err_default()
                .len();
            AccountSummary {
                name: user.name.clone(),
                uid: user.uid,
                home: user.home_dir.clone(),
                password: db.password_state(&user.name),
                ssh_keys,
            }
        })
        .collect();
    Ok(r)
}

fn print_accounts(accounts: &[AccountSummary], mut out: impl Write) -> Result<()> {
    let width = accounts
        .iter()
        .map(|a| a.name.len())
        .max()
        .unwrap_or_default()
        .max("NAME".len());
    writeln!(out, "{:width$}  {:>6}  {:8}  KEYS  HOME", "NAME", "UID", "PASSWORD")?;
    for a in accounts {
        writeln!(
            out,
            "{:width$}  {:>6}  {:8}  {:>4}  {}",
            a.name,
            a.uid,
            a.password.to_string(),
            a.ssh_keys,
            a.home
        )?;
    }
    Ok(())
}
