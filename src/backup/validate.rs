//! Validation functions for configuration values.
//!
//! Provides custom validation functions for database names, file sources
//! and other configuration parameters.

use crate::backup::backup_config::SourceEntry;
use crate::backup::planner::RUN_TIMESTAMP_LEN;
use crate::backup::tar::TAR_GZ_SUFFIX;
use itertools::Itertools;
use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

use std::collections::HashMap;
use std::path::Path;

/// Longest file name, in bytes, that common filesystems accept
pub const MAX_FILE_NAME_LEN: usize = 255;
/// Longest archive stem that still fits once `_<timestamp>.tar.gz` is appended
pub const MAX_ARCHIVE_STEM_LEN: usize =
    MAX_FILE_NAME_LEN - 1 - RUN_TIMESTAMP_LEN - TAR_GZ_SUFFIX.len();
/// MySQL identifier limit
pub const MAX_DATABASE_NAME_LEN: usize = 64;

pub fn validate_valid_file_name<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() {
        return Err(ValidationError::new("InvalidFileName")
            .with_message("File name must not be empty".into()));
    }

    if !is_sanitized(name) {
        return Err(ValidationError::new("InvalidFileName").with_message(
            format!(
                "Invalid file name {:?}, try sanitizing like {:?}",
                name,
                sanitize(name)
            )
            .into(),
        ));
    }

    Ok(())
}

pub fn validate_database_names(names: &[String]) -> Result<(), ValidationError> {
    names.iter().try_for_each(validate_valid_file_name)?;

    if let Some(long) = names.iter().find(|n| n.len() > MAX_DATABASE_NAME_LEN) {
        return Err(ValidationError::new("DatabaseNameTooLong").with_message(
            format!(
                "Database name {:?} is longer than {} bytes",
                long, MAX_DATABASE_NAME_LEN
            )
            .into(),
        ));
    }

    if let Some(dup) = names.iter().duplicates().next() {
        return Err(ValidationError::new("DuplicateDatabase")
            .with_message(format!("Database {:?} is listed more than once", dup).into()));
    }

    Ok(())
}

pub fn validate_not_a_file<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() && !dir.is_dir() {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} is not a directory", dir).into()));
    }

    Ok(())
}

/// Rejects bundles whose members would land on the same top-level archive entry,
/// and sources that would produce the same archive file name.
pub fn validate_sources(sources: &[SourceEntry]) -> Result<(), ValidationError> {
    for source in sources {
        let paths = source.paths();
        if paths.is_empty() {
            return Err(ValidationError::new("EmptyBundle")
                .with_message("A source bundle must contain at least one path".into()));
        }

        let mut by_name: HashMap<_, Vec<_>> = HashMap::new();
        for path in paths {
            match path.file_name() {
                Some(name) => by_name.entry(name).or_default().push(path),
                None => {
                    return Err(ValidationError::new("InvalidSource").with_message(
                        format!("Source {:?} has no base name to archive it under", path).into(),
                    ))
                }
            }
        }
        if let Some((name, clashing)) = by_name.iter().find(|(_, v)| v.len() > 1) {
            return Err(ValidationError::new("DuplicateEntryName").with_message(
                format!(
                    "Sources {:?} share the entry name {:?} inside one archive",
                    clashing, name
                )
                .into(),
            ));
        }
    }

    if let Some(long) = sources
        .iter()
        .map(SourceEntry::archive_stem)
        .find(|stem| stem.len() > MAX_ARCHIVE_STEM_LEN)
    {
        return Err(ValidationError::new("ArchiveNameTooLong").with_message(
            format!(
                "Archive name {:?} is longer than {} bytes, split the bundle or use shorter paths",
                long, MAX_ARCHIVE_STEM_LEN
            )
            .into(),
        ));
    }

    if let Some(dup) = sources.iter().map(SourceEntry::archive_stem).duplicates().next() {
        return Err(ValidationError::new("DuplicateArchiveName").with_message(
            format!("More than one source maps to archive name {:?}", dup).into(),
        ));
    }

    Ok(())
}
