//! Parses and validates the server's CLI-flag configuration.
//!
//! `spec.md` §6 specifies CLI flags, not environment variables, as the
//! server's configuration surface: `-d <domain> -m <maildir> -s <smtp-port>
//! -p <mgmt-port>` are required, `-t <cmd>` and `-f <vrfy-file>` are
//! optional. Argument parsing itself is treated as an external concern
//! (`spec.md` §1), so this module scans `argv` by hand rather than pulling
//! in a parsing crate.

use anyhow::{anyhow, Result};
use std::path::PathBuf;

/// Runtime configuration for the `smtpd` server binary.
#[derive(Debug, Clone)]
pub struct Config {
    /// Domain advertised in the greeting banner and HELO/EHLO replies.
    pub domain: String,
    /// Maildrop root directory; messages land under `<root>/<domain>/<local>/<file>`.
    pub maildir: PathBuf,
    /// TCP port the SMTP listener binds.
    pub smtp_port: u16,
    /// UDP port the control-plane listener binds.
    pub mgmt_port: u16,
    /// Shell command used to transform message bodies, if configured.
    pub transform_cmd: Option<String>,
    /// Path to a line-oriented file of verifiable addresses for VRFY.
    pub vrfy_file: Option<PathBuf>,
}

impl Config {
    /// Parses `Config` from a slice of CLI arguments (excluding argv[0]).
    ///
    /// # Errors
    ///
    /// Returns an `Err` describing the first missing or malformed flag.
    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut domain: Option<String> = None;
        let mut maildir: Option<PathBuf> = None;
        let mut smtp_port: Option<u16> = None;
        let mut mgmt_port: Option<u16> = None;
        let mut transform_cmd: Option<String> = None;
        let mut vrfy_file: Option<PathBuf> = None;

        let mut iter = args.into_iter().map(|s| s.as_ref().to_string());
        while let Some(flag) = iter.next() {
            let mut next = || {
                iter.next()
                    .ok_or_else(|| anyhow!("flag {} requires an argument", flag))
            };
            match flag.as_str() {
                "-d" => domain = Some(next()?),
                "-m" => maildir = Some(PathBuf::from(next()?)),
                "-s" => {
                    let raw = next()?;
                    smtp_port = Some(
                        raw.parse::<u16>()
                            .map_err(|e| anyhow!("-s ('{}') must be a valid u16 port: {}", raw, e))?,
                    );
                }
                "-p" => {
                    let raw = next()?;
                    mgmt_port = Some(
                        raw.parse::<u16>()
                            .map_err(|e| anyhow!("-p ('{}') must be a valid u16 port: {}", raw, e))?,
                    );
                }
                "-t" => transform_cmd = Some(next()?),
                "-f" => vrfy_file = Some(PathBuf::from(next()?)),
                other => return Err(anyhow!("unrecognized flag: {}", other)),
            }
        }

        let domain = domain.ok_or_else(|| anyhow!("-d <domain> is required"))?;
        let maildir = maildir.ok_or_else(|| anyhow!("-m <maildir> is required"))?;
        let smtp_port = smtp_port.ok_or_else(|| anyhow!("-s <smtp-port> is required"))?;
        let mgmt_port = mgmt_port.ok_or_else(|| anyhow!("-p <mgmt-port> is required"))?;

        log::info!("Config: domain={}", domain);
        log::info!("Config: maildir={}", maildir.display());
        log::info!("Config: smtp_port={}", smtp_port);
        log::info!("Config: mgmt_port={}", mgmt_port);
        if let Some(cmd) = &transform_cmd {
            log::info!("Config: transform_cmd={}", cmd);
        }
        if let Some(f) = &vrfy_file {
            log::info!("Config: vrfy_file={}", f.display());
        }

        Ok(Config {
            domain,
            maildir,
            smtp_port,
            mgmt_port,
            transform_cmd,
            vrfy_file,
        })
    }

    /// Usage text printed on a malformed invocation.
    pub fn usage(program: &str) -> String {
        format!(
            "usage: {} -d <domain> -m <maildir> -s <smtp-port> -p <mgmt-port> [-t <transform-cmd>] [-f <vrfy-file>]",
            program
        )
    }
}

#[cfg(test)]
mod tests;
