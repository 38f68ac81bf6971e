//! Receiving side of the `UPLOAD` verb.
//!
//! An upload has no length field. The sender writes `UPLOAD <name>\r\n`, then
//! the raw file bytes, then shuts down its write half; end-of-stream on the
//! connection is the only completion signal.
//!
//! Bytes are received into a temporary file next to the destination and only
//! moved into place once the stream has ended, so a half-received upload is
//! never visible under its final name and is removed on failure.

use crate::error::AppError;
use crate::utils::copy_in_chunks;
use clap::ValueEnum;
use log::{debug, info, warn};
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;

/// Prefix of the temporary files uploads are received into. Names with this
/// prefix are never listed, served or accepted as upload targets.
pub const TEMP_FILE_PREFIX: &str = ".upl_sv_upload_";
const MAX_RENAME_ATTEMPTS: usize = 1000;

/// How an upload is stored when its destination name is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CollisionPolicy {
    /// Atomically replace the existing file; the last completed upload wins.
    #[default]
    Replace,
    /// Keep the existing file and store the upload as `stem-N.ext`.
    Rename,
    /// Keep the existing file and discard the upload.
    Reject,
}

/// Where an upload is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub file_name: String,
    pub destination: PathBuf,
}

impl UploadTarget {
    pub fn new(file_name: &str, destination: &Path) -> Result<Self, AppError> {
        validate_file_name(file_name)?;
        Ok(Self {
            file_name: file_name.to_string(),
            destination: destination.to_path_buf(),
        })
    }

    pub fn path(&self) -> PathBuf {
        self.destination.join(&self.file_name)
    }
}

/// Whether `name` is a temporary file of an upload still in progress.
pub fn is_staging_name(name: &str) -> bool {
    name.starts_with(TEMP_FILE_PREFIX)
}

/// Accepts only a single plain file name: no separators, no `.`/`..`, no
/// whitespace or control characters, and no staging prefix.
pub fn validate_file_name(name: &str) -> Result<&str, AppError> {
    let forbidden = |c: char| c == '/' || c == '\\' || c.is_control() || c.is_whitespace();
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None)
            if !name.contains(forbidden) && !is_staging_name(name) =>
        {
            Ok(name)
        }
        _ => Err(AppError::InvalidFileName(name.to_string())),
    }
}

/// Name tried on the `attempt`-th try under [`CollisionPolicy::Rename`].
///
/// `candidate_name("note.txt", 0)` is `note.txt`, attempt 2 gives `note-2.txt`.
pub fn candidate_name(file_name: &str, attempt: usize) -> String {
    if attempt == 0 {
        return file_name.to_string();
    }
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    match path.extension() {
        Some(ext) => format!("{stem}-{attempt}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{attempt}"),
    }
}

/// Streams `reader` to end-of-stream into the upload target.
///
/// Returns the final path and the number of bytes received. On any error the
/// temporary file is dropped and nothing is left under the destination name.
pub fn receive_upload<R: Read + ?Sized>(
    reader: &mut R,
    target: &UploadTarget,
    chunk_size: usize,
    policy: CollisionPolicy,
    log_prefix: &str,
) -> Result<(PathBuf, u64), AppError> {
    if !target.destination.is_dir() {
        debug!(
            "{} Creating upload directory '{}'",
            log_prefix,
            target.destination.display()
        );
        fs::create_dir_all(&target.destination)?;
    }

    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_FILE_PREFIX)
        .tempfile_in(&target.destination)?;

    let received = copy_in_chunks(reader, &mut temp, chunk_size)?;
    temp.flush()?;
    debug!(
        "{} Received {} bytes for '{}'",
        log_prefix, received, target.file_name
    );

    let saved = persist(temp, target, policy)?;
    info!(
        "{} Upload of '{}' stored at '{}' ({} bytes)",
        log_prefix,
        target.file_name,
        saved.display(),
        received
    );
    Ok((saved, received))
}

fn persist(
    temp: NamedTempFile,
    target: &UploadTarget,
    policy: CollisionPolicy,
) -> Result<PathBuf, AppError> {
    match policy {
        CollisionPolicy::Replace => {
            let dest = target.path();
            temp.persist(&dest)?;
            Ok(dest)
        }
        CollisionPolicy::Reject => {
            let dest = target.path();
            match temp.persist_noclobber(&dest) {
                Ok(_) => Ok(dest),
                Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                    Err(AppError::UploadCollision(target.file_name.clone()))
                }
                Err(e) => Err(e.into()),
            }
        }
        CollisionPolicy::Rename => {
            let mut temp = temp;
            for attempt in 0..MAX_RENAME_ATTEMPTS {
                let dest = target
                    .destination
                    .join(candidate_name(&target.file_name, attempt));
                match temp.persist_noclobber(&dest) {
                    Ok(_) => {
                        if attempt > 0 {
                            warn!(
                                "'{}' already exists, stored upload as '{}'",
                                target.file_name,
                                dest.display()
                            );
                        }
                        return Ok(dest);
                    }
                    Err(e) if e.error.kind() == ErrorKind::AlreadyExists => temp = e.file,
                    Err(e) => return Err(e.into()),
                }
            }
            Err(AppError::UploadCollision(target.file_name.clone()))
        }
    }
}
