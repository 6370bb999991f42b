use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::{AppError, AppResult};

/// Replace `path` with `bytes` so readers see either the old or the new
/// content, never a torn write. The parent directory must exist.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> AppResult<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(parent).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "write_atomic_create")
            .with_context("path", path.display().to_string())
    })?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "write_atomic_write")
                .with_context("path", path.display().to_string())
        })?;
    tmp.persist(path).map_err(|err| {
        AppError::from(err.error)
            .with_context("operation", "write_atomic_persist")
            .with_context("path", path.display().to_string())
    })?;
    Ok(())
}
