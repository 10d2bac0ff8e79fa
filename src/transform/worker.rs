//! Worker-side half of the transform protocol (§4.4), run when `smtpd` is
//! re-exec'd as `smtpd --transform-worker <cmd> <maildir>`.
//!
//! Each worker reads one `<recipient>-<filename>` descriptor per line from
//! its stdin, feeds the temporary message file (written by the master
//! directly under `<maildir>`) to `<cmd>` via a shell, redirects the
//! shell's stdout to the final maildrop destination, and reports `254` or
//! `255` on its own stdout.

use crate::maildrop;
use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::{Command, Stdio};

/// Runs the worker loop until stdin is closed (EOF), as happens when the
/// master drops its write end during shutdown.
pub fn run(transform_cmd: &str, maildir_root: &str) -> Result<()> {
    let root = Path::new(maildir_root);
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line.context("reading descriptor from master")?;
        let status = match process_one(transform_cmd, root, &line) {
            Ok(true) => "254",
            Ok(false) | Err(_) => "255",
        };
        writeln!(stdout, "{}", status).context("writing status to master")?;
        stdout.flush().context("flushing status to master")?;
    }
    Ok(())
}

fn process_one(transform_cmd: &str, root: &Path, descriptor: &str) -> Result<bool> {
    let (recipient, filename) = descriptor
        .rsplit_once('-')
        .context("malformed descriptor, expected <recipient>-<filename>")?;

    let src = root.join(filename);
    let dest = maildrop::destination_path(root, recipient, filename)?;

    let src_file = std::fs::File::open(&src)
        .with_context(|| format!("opening temp message file {}", src.display()))?;
    let dest_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&dest)
        .with_context(|| format!("creating transformed message file {}", dest.display()))?;

    let status = Command::new("sh")
        .arg("-c")
        .arg(transform_cmd)
        .stdin(Stdio::from(src_file))
        .stdout(Stdio::from(dest_file))
        .stderr(Stdio::inherit())
        .status()
        .with_context(|| format!("running transform command {:?}", transform_cmd))?;

    if status.success() {
        maildrop::finalize_transformed(&dest)?;
        let _ = std::fs::remove_file(&src);
        Ok(true)
    } else {
        Ok(false)
    }
}
