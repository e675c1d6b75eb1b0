//! File operations on data/key artifact pairs
//!
//! This module provides the file-level save, load, verify and reseal
//! operations on top of [`SecureContainer`]. Artifacts are always written
//! atomically and, on Unix, readable by the owner only.

use crate::container::SecureContainer;
use crate::error::{ErrorCategory, ErrorKind, Result, SplitboxError};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::info;
use zeroize::Zeroizing;

/// Conventional name of the data file.
pub const DEFAULT_DATA_FILE: &str = "datafile.ddf";

/// Conventional name of the key file.
pub const DEFAULT_KEY_FILE: &str = "datafile.key";

/// Seal `payload` and write the data file and key file.
///
/// Both artifacts are fully written and synced to tempfiles next to their
/// targets before either target is replaced. Any write failure therefore
/// leaves the existing pair untouched. Only a crash between the two renames
/// can leave a mixed pair, which load reports as a binding mismatch.
pub fn save(
    container: &SecureContainer,
    payload: &[u8],
    data_path: &Path,
    key_path: &Path,
) -> Result<()> {
    let (data_text, key_text) = container
        .save(payload)
        .map_err(|e| e.with_context("failed to seal payload"))?;
    let staged_data = stage(data_path, data_text.as_bytes())
        .map_err(|e| e.with_context(format!("failed to write to {}", data_path.display())))?;
    let staged_key = stage(key_path, key_text.as_bytes())
        .map_err(|e| e.with_context(format!("failed to write to {}", key_path.display())))?;

    commit(staged_data, data_path)?;
    commit(staged_key, key_path)?;

    let config = container.config();
    info!(
        data = %data_path.display(),
        key = %key_path.display(),
        hash = %config.hash,
        cipher = %config.cipher,
        mode = %config.mode,
        "wrote artifact pair"
    );
    Ok(())
}

/// Read, verify and decrypt an artifact pair, returning the payload.
pub fn load(container: &SecureContainer, data_path: &Path, key_path: &Path) -> Result<Vec<u8>> {
    let data_text = read_text(data_path, "data file")?;
    let key_text = Zeroizing::new(read_text(key_path, "key file")?);
    let payload = container
        .load(&data_text, &key_text)
        .map_err(|e| e.with_context("failed to open artifact pair"))?;
    info!(data = %data_path.display(), "opened artifact pair");
    Ok(payload)
}

/// Check that an artifact pair belongs together and is unmodified.
pub fn verify(container: &SecureContainer, data_path: &Path, key_path: &Path) -> Result<()> {
    let data_text = read_text(data_path, "data file")?;
    let key_text = Zeroizing::new(read_text(key_path, "key file")?);
    container
        .check(&data_text, &key_text)
        .map_err(|e| e.with_context("verification failed"))
}

/// Seal the contents of `input_path` into a data file and a key file.
pub fn seal_file(
    container: &SecureContainer,
    input_path: &Path,
    data_path: &Path,
    key_path: &Path,
) -> Result<()> {
    let payload = Zeroizing::new(fs::read(input_path).map_err(|e| read_error(input_path, e))?);
    save(container, &payload, data_path, key_path)
}

/// Open an artifact pair and write the payload to `output_path`.
///
/// The output file is created with mode 0o600 (read/write for owner only) on Unix systems.
pub fn open_file(
    container: &SecureContainer,
    data_path: &Path,
    key_path: &Path,
    output_path: &Path,
) -> Result<()> {
    let payload = Zeroizing::new(load(container, data_path, key_path)?);
    write_file_secure(output_path, &payload)
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))?;
    Ok(())
}

/// Replace an existing artifact pair with a freshly sealed one.
///
/// This function:
/// 1. Opens the existing pair to prove the key file matches the data file
/// 2. Reads new content from `input_path`
/// 3. Seals it under a new binding, key and IV
/// 4. Replaces both files as described for [`save`]
///
/// The check in step 1 prevents overwriting a data file whose key file has
/// been lost or mixed up.
pub fn reseal_file(
    container: &SecureContainer,
    input_path: &Path,
    data_path: &Path,
    key_path: &Path,
) -> Result<()> {
    // Discard the old payload; opening it is only a proof of possession.
    drop(Zeroizing::new(load(container, data_path, key_path)?));

    let payload = Zeroizing::new(fs::read(input_path).map_err(|e| read_error(input_path, e))?);
    save(container, &payload, data_path, key_path)
}

fn read_text(path: &Path, what: &str) -> Result<String> {
    let bytes = fs::read(path).map_err(|e| read_error(path, e))?;
    String::from_utf8(bytes).map_err(|e| {
        SplitboxError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::MalformedArtifact,
            format!("{} {} is not valid UTF-8", what, path.display()),
            e,
        )
    })
}

/// Write `contents` to a tempfile in the directory of `path`, fsync it and
/// restrict it to mode 0o600 on Unix. The target is not touched until the
/// returned file is passed to [`commit`]; dropping it removes the tempfile.
fn stage(path: &Path, contents: &[u8]) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp_file = NamedTempFile::new_in(dir).map_err(|e| {
        SplitboxError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Io,
            format!("failed to create tempfile in {}", dir.display()),
            e,
        )
    })?;

    temp_file.write_all(contents).map_err(|e| {
        SplitboxError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "failed to write to tempfile",
            e,
        )
    })?;
    // Flush and fsync() such that the rename in commit(), if it succeeds,
    // will always point to a valid file.
    temp_file.flush().map_err(|e| {
        SplitboxError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "failed to flush tempfile",
            e,
        )
    })?;
    temp_file.as_file().sync_all().map_err(|e| {
        SplitboxError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "failed to sync file prior to rename",
            e,
        )
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp_file
            .as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|e| {
                SplitboxError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    "failed to set tempfile permissions",
                    e,
                )
            })?;
    }
    Ok(temp_file)
}

/// Atomically rename a staged tempfile onto `path`.
fn commit(temp_file: NamedTempFile, path: &Path) -> Result<()> {
    temp_file.persist(path).map_err(|e| {
        SplitboxError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("failed to rename to target file {}", path.display()),
            e,
        )
    })?;
    Ok(())
}

/// Write file with secure permissions (0o600 on Unix)
fn write_file_secure(path: &Path, contents: &[u8]) -> Result<()> {
    #[cfg(unix)]
    {
        use std::fs::OpenOptions;
        use std::os::unix::fs::OpenOptionsExt;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(|e| {
                SplitboxError::with_kind_and_source(
                    ErrorCategory::User,
                    ErrorKind::Io,
                    format!("failed to open {}", path.display()),
                    e,
                )
            })?;

        file.write_all(contents).map_err(|e| {
            SplitboxError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                format!("failed to write {}", path.display()),
                e,
            )
        })?;
        Ok(())
    }

    #[cfg(not(unix))]
    {
        fs::write(path, contents).map_err(|e| {
            SplitboxError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::Io,
                format!("failed to write {}", path.display()),
                e,
            )
        })?;
        Ok(())
    }
}

fn read_error(path: &Path, err: io::Error) -> SplitboxError {
    let category = if err.kind() == io::ErrorKind::NotFound {
        ErrorCategory::User
    } else {
        ErrorCategory::Internal
    };
    SplitboxError::with_kind_and_source(
        category,
        ErrorKind::Io,
        format!("failed to read from {}", path.display()),
        err,
    )
}
