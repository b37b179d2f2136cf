//! Atomic persistence of output files.

use std::{
    io::{self, Write},
    path::Path,
};

use tempfile::NamedTempFile;

use crate::Error;

/// Atomically writes `bytes` to the specified path.
///
/// The data is written to a temporary file in the destination directory, flushed to disk,
/// and then renamed over the destination. Thus, a reader never observes a partially written
/// file, and a failed write leaves the destination untouched.
///
/// # Errors
///
/// Returns [`Error::Write`] if any I/O operation fails.
pub fn persist(path: impl AsRef<Path>, bytes: &[u8]) -> Result<(), Error> {
    let path = path.as_ref();
    let wrap_err = |source: io::Error| Error::Write {
        path: path.to_owned(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir).map_err(wrap_err)?;
    file.write_all(bytes).map_err(wrap_err)?;
    file.as_file().sync_all().map_err(wrap_err)?;
    file.persist(path).map_err(|err| wrap_err(err.error))?;

    log::debug!("written {} bytes to `{}`", bytes.len(), path.display());
    Ok(())
}
