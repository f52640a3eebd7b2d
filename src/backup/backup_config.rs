use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::validate::{validate_database_names, validate_not_a_file, validate_sources};
use bon::Builder;
use getset::{CopyGetters, Getters};
use sanitize_filename::sanitize;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use validator::Validate;

pub const DEFAULT_MYSQL_PORT: u16 = 3306;
pub const DEFAULT_DUMP_PROGRAM: &str = "mysqldump";
pub const DEFAULT_COMPRESS_PROGRAM: &str = "gzip";
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;
pub const ARCHIVE_NAME_PREFIX: &str = "backup";

/// Whole configuration document, loaded once before any backup work starts.
#[derive(Clone, Serialize, Deserialize, Debug, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct BackupConfig {
    #[validate(nested)]
    backup: BackupRootConfig,
    #[validate(nested)]
    mysql: MysqlConfig,
    #[validate(nested)]
    file_backups: FileBackupsConfig,
}

#[derive(Clone, Serialize, Deserialize, Debug, Validate, Builder, Getters, CopyGetters)]
#[serde(deny_unknown_fields)]
pub struct BackupRootConfig {
    /// Backups land under `<root_path>/<year>/`
    #[validate(custom(function = validate_not_a_file))]
    #[builder(into)]
    #[getset(get = "pub")]
    root_path: PathBuf,
    /// Number of jobs of one batch that may run at the same time
    #[serde(default = "default_parallel_jobs")]
    #[validate(range(min = 1))]
    #[builder(default = default_parallel_jobs())]
    #[getset(get_copy = "pub")]
    parallel_jobs: usize,
}

fn default_parallel_jobs() -> usize {
    1
}

/// Connection settings and database list for the dump pipeline
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate, Builder, Getters, CopyGetters)]
#[serde(deny_unknown_fields)]
pub struct MysqlConfig {
    #[validate(length(min = 1))]
    #[builder(into)]
    #[getset(get = "pub")]
    host: String,
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    #[builder(default = DEFAULT_MYSQL_PORT)]
    #[getset(get_copy = "pub")]
    port: u16,
    #[builder(into)]
    #[getset(get = "pub")]
    username: String,
    #[builder(into)]
    #[getset(get = "pub")]
    password: RedactedString,
    #[validate(custom(function = validate_database_names))]
    #[builder(default, into)]
    #[getset(get = "pub")]
    databases: Vec<String>,
    #[serde(default = "default_true")]
    #[builder(default = true)]
    #[getset(get_copy = "pub")]
    compress: bool,
    #[serde(default = "default_dump_program")]
    #[validate(length(min = 1))]
    #[builder(default = default_dump_program(), into)]
    #[getset(get = "pub")]
    dump_program: String,
    #[serde(default = "default_compress_program")]
    #[validate(length(min = 1))]
    #[builder(default = default_compress_program(), into)]
    #[getset(get = "pub")]
    compress_program: String,
    /// Upper bound for one database dump, both processes included
    #[serde(default, with = "humantime_serde")]
    #[getset(get_copy = "pub")]
    timeout: Option<Duration>,
}

fn default_port() -> u16 {
    DEFAULT_MYSQL_PORT
}

fn default_true() -> bool {
    true
}

fn default_dump_program() -> String {
    DEFAULT_DUMP_PROGRAM.into()
}

fn default_compress_program() -> String {
    DEFAULT_COMPRESS_PROGRAM.into()
}

#[derive(Clone, Serialize, Deserialize, Debug, Validate, Builder, Getters, CopyGetters)]
#[serde(deny_unknown_fields)]
pub struct FileBackupsConfig {
    #[validate(custom(function = validate_sources))]
    #[builder(default, into)]
    #[getset(get = "pub")]
    sources: Vec<SourceEntry>,
    /// Gzip level used for the tarballs
    #[serde(default = "default_compression_level")]
    #[validate(range(min = 0, max = 9))]
    #[builder(default = DEFAULT_COMPRESSION_LEVEL)]
    #[getset(get_copy = "pub")]
    compression_level: u32,
}

fn default_compression_level() -> u32 {
    DEFAULT_COMPRESSION_LEVEL
}

/// One configured file backup: a single path, or several paths bundled into one archive.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum SourceEntry {
    Single(PathBuf),
    Bundle(Vec<PathBuf>),
}

impl SourceEntry {
    pub fn paths(&self) -> &[PathBuf] {
        match self {
            SourceEntry::Single(p) => std::slice::from_ref(p),
            SourceEntry::Bundle(v) => v.as_slice(),
        }
    }

    /// Filesystem-safe archive name without timestamp or suffix,
    /// e.g. `/home/user/docs` becomes `backup-home-user-docs`.
    pub fn archive_stem(&self) -> String {
        let joined = self
            .paths()
            .iter()
            .map(|p| flatten_path(p))
            .collect::<Vec<_>>()
            .join("+");
        sanitize(format!("{ARCHIVE_NAME_PREFIX}-{joined}"))
    }
}

fn flatten_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace(['/', std::path::MAIN_SEPARATOR], "-")
        .trim_matches('-')
        .to_string()
}

impl From<PathBuf> for SourceEntry {
    fn from(value: PathBuf) -> Self {
        SourceEntry::Single(value)
    }
}

impl From<Vec<PathBuf>> for SourceEntry {
    fn from(value: Vec<PathBuf>) -> Self {
        SourceEntry::Bundle(value)
    }
}

/// Reads, parses and validates the configuration file.
///
/// A missing file, an empty document and malformed content are reported as
/// distinct errors; all of them are configuration errors.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<BackupConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::ConfigNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigUnreadable {
        path: path.to_path_buf(),
        source,
    })?;
    if content
        .lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with('#'))
    {
        return Err(Error::ConfigEmpty(path.to_path_buf()));
    }

    let value: serde_yml::Value = serde_yml::from_str(&content)
        .map_err(Error::from)
        .with_msg(format!("Parse YAML config failed: {:?}", path))?;
    if value.is_null() {
        return Err(Error::ConfigEmpty(path.to_path_buf()));
    }

    let config: BackupConfig = serde_yml::from_value(value)
        .map_err(Error::from)
        .with_msg(format!("Parse YAML config failed: {:?}", path))?;
    config
        .validate()
        .map_err(Error::from)
        .with_msg(format!("Config validation failed: {:?}", path))?;

    debug!("Loaded config {:?}: {:?}", path, config);
    Ok(config)
}
