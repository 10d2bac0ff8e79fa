//! VRFY address-file lookup, per `spec.md` §4.3/§9(b).
//!
//! The verify file is a flat newline-separated list of addresses, loaded
//! once at startup (re-reading it per VRFY would be the simpler design but
//! the spec's `Config.vrfy_file` is sized for small deployments where an
//! in-memory copy is cheap and avoids a file read tail-chasing writers).
//! §9(b): the verify-enabled toggle is tracked by `Metrics` but VRFY itself
//! always consults the loaded file regardless of that toggle's value.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Outcome of looking an address up against the verify file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VrfyResult {
    /// Exactly one address matched; carries the full matched address.
    Found(String),
    /// More than one address matched the supplied prefix/fragment.
    Ambiguous(Vec<String>),
    /// No address matched.
    NotFound,
}

/// An in-memory copy of the addresses named in `Config.vrfy_file`.
#[derive(Debug, Clone, Default)]
pub struct VerifyTable {
    addresses: Vec<String>,
}

impl VerifyTable {
    /// Loads the verify file, one address per non-blank line. Returns an
    /// empty table (every VRFY replies not-found) when no file is
    /// configured.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let addresses = match path {
            None => Vec::new(),
            Some(path) => {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("reading verify file {}", path.display()))?;
                contents
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect()
            }
        };
        Ok(VerifyTable { addresses })
    }

    /// Looks `query` up: an exact match wins outright; otherwise every
    /// address whose local part starts with `query` (case-insensitive) is
    /// collected and the result depends on how many there are.
    pub fn lookup(&self, query: &str) -> VrfyResult {
        if self.addresses.iter().any(|a| a.eq_ignore_ascii_case(query)) {
            return VrfyResult::Found(query.to_string());
        }
        let query_lower = query.to_ascii_lowercase();
        let matches: Vec<String> = self
            .addresses
            .iter()
            .filter(|a| {
                a.split('@')
                    .next()
                    .map(|local| local.to_ascii_lowercase().starts_with(&query_lower))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        match matches.len() {
            0 => VrfyResult::NotFound,
            1 => VrfyResult::Found(matches.into_iter().next().unwrap()),
            _ => VrfyResult::Ambiguous(matches),
        }
    }
}

/// Formats a `VrfyResult` as the SMTP reply text (without trailing CRLF),
/// per §4.3: `250-<addr>` on a single match, a `553-`-prefixed listing when
/// ambiguous, `553 mailbox not found` otherwise.
pub fn format_reply(result: &VrfyResult) -> String {
    match result {
        VrfyResult::Found(addr) => format!("250-{}", addr),
        VrfyResult::Ambiguous(addrs) => {
            let mut lines: Vec<String> = addrs.iter().map(|a| format!("553-{}", a)).collect();
            lines.push("553 Ambiguous; more than one match".to_string());
            lines.join("\r\n")
        }
        VrfyResult::NotFound => "553 mailbox not found".to_string(),
    }
}
