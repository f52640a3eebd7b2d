//! Tracing subscriber setup for the backup binary.
//!
//! The level defaults to INFO, or DEBUG with `--verbose`, and can always be
//! overridden through `RUST_LOG`.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Default)]
pub struct LogConfig {
    /// Sets the default level to DEBUG
    pub verbose: bool,
    /// Append log lines to this file instead of writing them to stderr
    pub log_file: Option<PathBuf>,
}

impl LogConfig {
    fn default_level(&self) -> Level {
        if self.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.default_level().as_str().to_lowercase()))
    }
}

/// Installs the global subscriber. Call once, before anything logs.
pub fn init(config: &LogConfig) -> Result<()> {
    let registry = tracing_subscriber::registry().with(config.env_filter());

    let res = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(Error::from)
                .with_msg(format!("Open log file failed: {:?}", path))?;
            registry
                .with(
                    fmt::layer()
                        .with_ansi(false)
                        .with_target(false)
                        .with_writer(Mutex::new(file)),
                )
                .try_init()
        }
        None => registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    res.map_err(|e| Error::from(std::io::Error::other(e)))
        .with_msg("Install tracing subscriber failed")
}
