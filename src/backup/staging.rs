//! Shared helpers for writing artifacts without leaving partial files behind.
//!
//! Every artifact is first written to a staging file next to its destination and
//! only renamed onto the destination once it is complete. A failed write removes
//! the staging file, so the destination either holds a whole artifact or nothing.

use crate::backup::events::{BackupEvent, EventSink};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Creates `dir` and its parents unless this is a dry run. Existing directories are fine.
pub fn ensure_dir<P: AsRef<Path>>(dir: P, dry_run: bool) -> Result<()> {
    let dir = dir.as_ref();
    if dry_run {
        return Ok(());
    }

    std::fs::create_dir_all(dir)
        .map_err(Error::from)
        .with_msg(format!("Create directory failed: {:?}", dir))
}

/// Staging names do not grow with the destination name, so any destination
/// name the filesystem accepts can be staged.
pub const STAGING_PREFIX: &str = ".yap-staging-";
pub const STAGING_SUFFIX: &str = ".tmp";

pub struct StagingFile {
    file: NamedTempFile,
    destination: PathBuf,
}

impl StagingFile {
    /// Creates a hidden, fixed-length staging file in the destination's directory.
    pub fn create<P: AsRef<Path>>(destination: P) -> Result<Self> {
        let destination = destination.as_ref();
        let dir = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let file = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(STAGING_SUFFIX)
            .tempfile_in(dir)
            .map_err(Error::from)
            .with_msg(format!("Create staging file for {:?} failed", destination))?;

        Ok(Self {
            file,
            destination: destination.to_path_buf(),
        })
    }

    pub fn as_file(&self) -> &File {
        self.file.as_file()
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Moves the staging file onto the destination and returns the artifact size.
    pub fn publish(self) -> Result<u64> {
        let destination = self.destination;
        // On failure the staging file is owned by the error and removed with it.
        self.file
            .persist(&destination)
            .map_err(|e| Error::from(e.error))
            .with_msg(format!("Move staging file onto {:?} failed", destination))?;

        std::fs::metadata(&destination)
            .map(|md| md.len())
            .map_err(Error::from)
            .with_msg(format!("Read size of {:?} failed", destination))
    }

    /// Removes the staging file after `error`, reporting the cleanup to `sink`.
    pub fn discard(self, sink: &dyn EventSink, error: Error) -> Error {
        let path = self.file.path().to_path_buf();
        match self.file.close() {
            Ok(()) => {
                sink.emit(BackupEvent::CleanedUp { path });
                error
            }
            Err(e) => error.chain(Error::from(e).with_msg(format!(
                "Remove partial file {:?} failed",
                path
            ))),
        }
    }
}

/// Writes an artifact through `write` into a staging file and publishes it on success.
///
/// Returns the size of the published artifact. When `write` fails, nothing is
/// left at the destination or in the staging location.
pub fn stage_and_publish<P, F>(destination: P, sink: &dyn EventSink, write: F) -> Result<u64>
where
    P: AsRef<Path>,
    F: FnOnce(&File) -> Result<()>,
{
    let staging = StagingFile::create(destination)?;
    match write(staging.as_file()) {
        Ok(()) => staging.publish(),
        Err(e) => Err(staging.discard(sink, e)),
    }
}
