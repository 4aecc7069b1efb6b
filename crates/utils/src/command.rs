use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::process::{Command, ExitStatus, Stdio};

use anyhow::{anyhow, Context, Result};

/// How much of a failed child's stderr we carry into the error.
const MAX_STDERR_BYTES: u64 = 1024;

/// Helpers intended for [`std::process::Command`].
pub trait CommandRunExt {
    /// Log (at debug level) the full child commandline.
    fn log_debug(&mut self) -> &mut Self;

    /// Execute the child process, capturing stderr into the error
    /// if it exits unsuccessfully.
    fn run_capture_stderr(&mut self) -> Result<()>;

    /// Execute the child process feeding `input` on its stdin.  Use this
    /// for secrets that must not appear in argv.  Stdout is discarded and
    /// stderr is captured as with [`Self::run_capture_stderr`].
    fn run_with_stdin(&mut self, input: &[u8]) -> Result<()>;

    /// Render the command as a shell-quoted string, for humans.
    fn to_string_pretty(&self) -> String;
}

/// Read the tail of a captured stderr file.
fn last_utf8_content(f: &mut File) -> Result<String> {
    let len = f.seek(SeekFrom::End(0))?;
    f.seek(SeekFrom::Start(len.saturating_sub(MAX_STDERR_BYTES)))?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).trim_end().to_owned())
}

fn status_to_result(st: ExitStatus, mut stderr: File) -> Result<()> {
    if st.success() {
        return Ok(());
    }
    let msg = last_utf8_content(&mut stderr)?;
    if msg.is_empty() {
        anyhow::bail!("Subprocess failed: {st}");
    }
    anyhow::bail!("Subprocess failed: {st}\n{msg}")
}

impl CommandRunExt for Command {
    fn log_debug(&mut self) -> &mut Self {
        tracing::debug!("exec: {}", self.to_string_pretty());
        self
    }

    fn run_capture_stderr(&mut self) -> Result<()> {
        let stderr = tempfile::tempfile()?;
        self.stderr(stderr.try_clone()?);
        tracing::trace!("exec: {self:?}");
        let st = self
            .status()
            .with_context(|| format!("Spawning {}", self.to_string_pretty()))?;
        status_to_result(st, stderr)
    }

    fn run_with_stdin(&mut self, input: &[u8]) -> Result<()> {
        let stderr = tempfile::tempfile()?;
        self.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(stderr.try_clone()?);
        let mut child = self
            .spawn()
            .with_context(|| format!("Spawning {}", self.to_string_pretty()))?;
        // Dropping the handle closes the pipe so the child sees EOF.
        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("Child stdin was not piped"))?;
            stdin.write_all(input).context("Writing child stdin")?;
        }
        let st = child.wait()?;
        status_to_result(st, stderr)
    }

    fn to_string_pretty(&self) -> String {
        std::iter::once(self.get_program())
            .chain(self.get_args())
            .map(|a| {
                let a = a.to_string_lossy();
                shlex::try_quote(&a)
                    .map(|q| q.into_owned())
                    .unwrap_or_else(|_| a.into_owned())
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
