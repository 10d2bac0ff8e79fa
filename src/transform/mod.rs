//! The transform dispatcher: master-side round-robin request/response over
//! pipes to a fixed pool of worker processes, per `spec.md` §4.4.
//!
//! Workers are the same `smtpd` binary re-exec'd with a hidden
//! `--transform-worker <cmd> <maildir>` argument pair (see
//! [`worker::run`]) rather than a second crate/binary — a private
//! master/worker protocol, not part of the public CLI surface in §6.

pub mod worker;

use anyhow::{bail, Context, Result};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

/// Fixed worker pool size, per §4.4 ("compile-time, e.g. 5").
pub const WORKER_COUNT: usize = 5;

struct TransformWorker {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    alive: bool,
}

impl TransformWorker {
    fn spawn(exe: &str, transform_cmd: &str, maildir: &str) -> Result<Self> {
        let mut child = Command::new(exe)
            .arg("--transform-worker")
            .arg(transform_cmd)
            .arg(maildir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawning transform worker ({})", exe))?;
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = BufReader::new(child.stdout.take().expect("piped stdout"));
        Ok(TransformWorker { child, stdin: Some(stdin), stdout, alive: true })
    }

    /// Sends one `<recipient>-<filename>` descriptor and blocks for the
    /// worker's one-line status reply. `Ok(true)` on `254`, `Ok(false)` on
    /// `255`; any pipe error is propagated so the caller can mark the
    /// worker dead.
    fn send_and_receive(&mut self, descriptor: &str) -> Result<bool> {
        let stdin = self.stdin.as_mut().context("transform worker stdin already closed")?;
        writeln!(stdin, "{}", descriptor).context("writing to transform worker stdin")?;
        stdin.flush().context("flushing transform worker stdin")?;

        let mut line = String::new();
        let n = self
            .stdout
            .read_line(&mut line)
            .context("reading transform worker stdout")?;
        if n == 0 {
            bail!("transform worker closed its pipe");
        }
        match line.trim() {
            "254" => Ok(true),
            "255" => Ok(false),
            other => bail!("transform worker sent unexpected status {:?}", other),
        }
    }

    /// Drops the write half (sending EOF on the worker's stdin) and reaps
    /// the child, per the SIGINT shutdown sequence in §5.
    fn shutdown(&mut self) {
        self.stdin = None;
        let _ = self.child.wait();
        self.alive = false;
    }
}

/// Round-robin dispatcher over the worker pool.
pub struct TransformDispatcher {
    workers: Vec<TransformWorker>,
    cursor: usize,
}

impl TransformDispatcher {
    /// Spawns `WORKER_COUNT` workers, each re-exec'ing `exe` with the
    /// hidden worker flag.
    pub fn spawn(exe: &str, transform_cmd: &str, maildir: &str) -> Result<Self> {
        let mut workers = Vec::with_capacity(WORKER_COUNT);
        for _ in 0..WORKER_COUNT {
            workers.push(TransformWorker::spawn(exe, transform_cmd, maildir)?);
        }
        Ok(TransformDispatcher { workers, cursor: 0 })
    }

    /// Dispatches one `<recipient>-<filename>` descriptor to the next live
    /// worker in round-robin order, advancing the cursor exactly once per
    /// call regardless of how many dead workers are skipped. Returns
    /// `Ok(true)` if the worker reported success.
    pub fn dispatch(&mut self, recipient: &str, filename: &str) -> Result<bool> {
        if self.workers.is_empty() || self.workers.iter().all(|w| !w.alive) {
            bail!("no live transform workers");
        }
        let descriptor = format!("{}-{}", recipient, filename);
        let n = self.workers.len();
        for _ in 0..n {
            let idx = self.cursor;
            self.cursor = (self.cursor + 1) % n;
            if !self.workers[idx].alive {
                continue;
            }
            match self.workers[idx].send_and_receive(&descriptor) {
                Ok(success) => return Ok(success),
                Err(_) => {
                    self.workers[idx].alive = false;
                    continue;
                }
            }
        }
        bail!("all transform workers dead")
    }

    /// Closes stdin on every worker (EOF) and reaps each with a bounded
    /// wait, per the SIGINT shutdown sequence in §5.
    pub fn shutdown(&mut self) {
        for worker in &mut self.workers {
            if worker.alive {
                worker.shutdown();
            }
        }
    }
}
