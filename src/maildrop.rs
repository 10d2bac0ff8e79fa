//! Maildrop filesystem layout, per `spec.md` §6: `<root>/<domain>/<local-part>/<filename>`
//! with directories at mode 0770 and files at mode 0660.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// Splits `addr` (`local@domain`) into its two halves, used to build the
/// destination directory. Callers validate `addr` with
/// `smtp::parser::is_valid_email` before reaching here.
fn split_address(addr: &str) -> Option<(&str, &str)> {
    addr.split_once('@')
}

/// Ensures `<root>/<domain>/<local_part>/` exists (mode 0770, idempotent)
/// and returns it.
pub fn recipient_dir(root: &Path, addr: &str) -> Result<PathBuf> {
    let (local, domain) = split_address(addr)
        .with_context(|| format!("recipient address {} has no '@'", addr))?;
    let dir = root.join(domain).join(local);
    fs::create_dir_all(&dir).with_context(|| format!("creating maildrop dir {}", dir.display()))?;
    fs::set_permissions(&dir, fs::Permissions::from_mode(0o770))
        .with_context(|| format!("setting permissions on {}", dir.display()))?;
    Ok(dir)
}

/// Opens a fresh temporary message file at mode 0660 under `<maildir>`,
/// used while a DATA transaction is in flight (before the recipient
/// directory is known).
pub fn create_temp_file(maildir_root: &Path, filename: &str) -> Result<File> {
    fs::create_dir_all(maildir_root)
        .with_context(|| format!("creating maildrop root {}", maildir_root.display()))?;
    let path = maildir_root.join(filename);
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o660)
        .open(&path)
        .with_context(|| format!("creating message file {}", path.display()))
}

/// Copies `src`'s contents verbatim into `<root>/<domain>/<local-part>/<filename>`
/// at mode 0660, used for each recipient when transform is disabled
/// (§4.4, §9(c)).
pub fn store_verbatim(root: &Path, recipient: &str, filename: &str, src: &Path) -> Result<PathBuf> {
    let dir = recipient_dir(root, recipient)?;
    let dest = dir.join(filename);
    let contents =
        fs::read(src).with_context(|| format!("reading message body {}", src.display()))?;
    write_with_mode(&dest, &contents)?;
    Ok(dest)
}

/// Moves an already-transformed file produced by a worker into its final
/// maildrop location. Workers write directly to the destination path
/// (§4.4), so this exists for the master's bookkeeping/cleanup symmetry
/// with `store_verbatim`; it is a no-op rename when the worker already
/// wrote in place.
pub fn finalize_transformed(dest: &Path) -> Result<()> {
    fs::set_permissions(dest, fs::Permissions::from_mode(0o660))
        .with_context(|| format!("setting permissions on {}", dest.display()))
}

fn write_with_mode(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o660)
        .open(path)
        .with_context(|| format!("creating {}", path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("writing {}", path.display()))
}

/// Builds the destination path a transform worker should write to:
/// `<root>/<domain>/<local-part>/<filename>`, creating the recipient
/// directory first.
pub fn destination_path(root: &Path, recipient: &str, filename: &str) -> Result<PathBuf> {
    Ok(recipient_dir(root, recipient)?.join(filename))
}
