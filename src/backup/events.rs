//! Observability side channel for the pipelines.
//!
//! Pipelines report what they do as [`BackupEvent`]s to an [`EventSink`] handed to
//! them by the caller. Sinks only observe; nothing they do feeds back into outcomes.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

pub static DRY_RUN_PREFIX: &str = "DRYRUN::";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BackupEvent {
    DumpStarted {
        database: String,
        /// Redacted rendering of the dump command line
        command: String,
        dry_run: bool,
    },
    ArchiveStarted {
        archive: PathBuf,
        dry_run: bool,
    },
    EntryAdded {
        archive: PathBuf,
        source: PathBuf,
        entry_name: String,
        /// Number of filesystem entries under `source`, itself included
        entry_count: u64,
        dry_run: bool,
    },
    EntrySkipped {
        archive: PathBuf,
        source: PathBuf,
        dry_run: bool,
    },
    /// A file inside a source that tar cannot store, such as a socket
    SpecialFileSkipped {
        archive: PathBuf,
        path: PathBuf,
    },
    JobSkipped {
        path: PathBuf,
        reason: String,
        dry_run: bool,
    },
    Created {
        path: PathBuf,
        simulated: bool,
        size: Option<u64>,
    },
    Failed {
        path: PathBuf,
        reason: String,
    },
    CleanedUp {
        path: PathBuf,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: BackupEvent);
}

fn prefix(dry_run: bool) -> &'static str {
    if dry_run {
        DRY_RUN_PREFIX
    } else {
        ""
    }
}

/// Renders every event through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: BackupEvent) {
        match event {
            BackupEvent::DumpStarted {
                database,
                command,
                dry_run,
            } => {
                info!("{}Dumping {}...", prefix(dry_run), database);
                if dry_run {
                    info!("{}Command: {}", DRY_RUN_PREFIX, command);
                } else {
                    debug!("Command: {}", command);
                }
            }
            BackupEvent::ArchiveStarted { archive, dry_run } => {
                info!("{}Creating tar archive {:?}", prefix(dry_run), archive)
            }
            BackupEvent::EntryAdded {
                archive,
                source,
                entry_name,
                entry_count,
                dry_run,
            } => info!(
                "{}Adding {:?} to tar archive {:?} as {:?} ({} entries)",
                prefix(dry_run),
                source,
                archive,
                entry_name,
                entry_count
            ),
            BackupEvent::EntrySkipped {
                source, dry_run, ..
            } => warn!(
                "{}Warning: {:?} does not exist, skipping",
                prefix(dry_run),
                source
            ),
            BackupEvent::SpecialFileSkipped { archive, path } => warn!(
                "Warning: {:?} is a socket, leaving it out of {:?}",
                path, archive
            ),
            BackupEvent::JobSkipped {
                path,
                reason,
                dry_run,
            } => warn!("{}Skipped {:?}: {}", prefix(dry_run), path, reason),
            BackupEvent::Created {
                path,
                simulated,
                size,
            } => match size {
                Some(size) => info!("{}Created: {:?} ({} bytes)", prefix(simulated), path, size),
                None => info!("{}Created: {:?}", prefix(simulated), path),
            },
            BackupEvent::Failed { path, reason } => error!("Failed {:?}: {}", path, reason),
            BackupEvent::CleanedUp { path } => info!("Removed partial file {:?}", path),
        }
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<BackupEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BackupEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: BackupEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_keeps_order() {
        let sink = MemorySink::new();
        sink.emit(BackupEvent::CleanedUp {
            path: PathBuf::from("a"),
        });
        sink.emit(BackupEvent::CleanedUp {
            path: PathBuf::from("b"),
        });

        assert_eq!(
            sink.events(),
            vec![
                BackupEvent::CleanedUp {
                    path: PathBuf::from("a")
                },
                BackupEvent::CleanedUp {
                    path: PathBuf::from("b")
                },
            ]
        );
    }

    #[test]
    fn test_tracing_sink_accepts_every_event() {
        let sink = TracingSink;
        sink.emit(BackupEvent::DumpStarted {
            database: "app".into(),
            command: "mysqldump app".into(),
            dry_run: true,
        });
        sink.emit(BackupEvent::Created {
            path: PathBuf::from("/tmp/app.sql.gz"),
            simulated: false,
            size: Some(42),
        });
        sink.emit(BackupEvent::Failed {
            path: PathBuf::from("/tmp/app.sql.gz"),
            reason: "boom".into(),
        });
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_string(&BackupEvent::CleanedUp {
            path: PathBuf::from("/tmp/x"),
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"cleaned_up","path":"/tmp/x"}"#);
    }
}
