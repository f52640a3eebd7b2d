//! Database dumps: run the dump tool per database, optionally piped through a
//! compression filter, into `<dest_dir>/<database>_<timestamp>.sql[.gz]`.

pub mod command;
pub mod process;

use crate::backup::backup_config::MysqlConfig;
use crate::backup::dump::command::DumpCommand;
use crate::backup::events::{BackupEvent, EventSink};
use crate::backup::outcome::{Created, JobResult, Outcome};
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::staging::{ensure_dir, stage_and_publish};
use bon::Builder;
use getset::{CopyGetters, Getters};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

pub static PLAIN_DUMP_EXT: &str = "sql";
pub static COMPRESSED_DUMP_EXT: &str = "sql.gz";

/// One database to export and where its dump goes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Getters)]
#[getset(get = "pub")]
pub struct DumpJob {
    database_name: String,
    destination_path: PathBuf,
}

impl DumpJob {
    pub fn new<S: Into<String>, P: AsRef<Path>>(
        database_name: S,
        dest_dir: P,
        run_timestamp: &str,
        compress: bool,
    ) -> Self {
        let database_name = database_name.into();
        let ext = if compress {
            COMPRESSED_DUMP_EXT
        } else {
            PLAIN_DUMP_EXT
        };
        let destination_path = dest_dir
            .as_ref()
            .join(format!("{database_name}_{run_timestamp}.{ext}"));
        Self {
            database_name,
            destination_path,
        }
    }
}

/// Where and as whom the dump tool connects.
#[derive(Clone, Debug, Builder, Getters, CopyGetters)]
pub struct DumpConnection {
    #[builder(into)]
    #[getset(get = "pub")]
    host: String,
    #[getset(get_copy = "pub")]
    port: u16,
    #[builder(into)]
    #[getset(get = "pub")]
    username: String,
    #[builder(into)]
    #[getset(get = "pub")]
    password: RedactedString,
}

#[derive(Clone, Debug, Builder, Getters, CopyGetters)]
pub struct DumpPipeline {
    #[getset(get = "pub")]
    connection: DumpConnection,
    #[builder(default = true)]
    #[getset(get_copy = "pub")]
    compress: bool,
    #[builder(into)]
    #[getset(get = "pub")]
    dump_program: String,
    #[builder(into)]
    #[getset(get = "pub")]
    compress_program: String,
    #[getset(get_copy = "pub")]
    timeout: Option<Duration>,
}

impl From<&MysqlConfig> for DumpPipeline {
    fn from(config: &MysqlConfig) -> Self {
        let connection = DumpConnection::builder()
            .host(config.host())
            .port(config.port())
            .username(config.username())
            .password(config.password().clone())
            .build();
        DumpPipeline::builder()
            .connection(connection)
            .compress(config.compress())
            .dump_program(config.dump_program())
            .compress_program(config.compress_program())
            .maybe_timeout(config.timeout())
            .build()
    }
}

impl DumpPipeline {
    pub fn job<P: AsRef<Path>>(&self, database_name: &str, dest_dir: P, run_timestamp: &str) -> DumpJob {
        DumpJob::new(database_name, dest_dir, run_timestamp, self.compress)
    }

    pub fn dump_command(&self, database_name: &str) -> DumpCommand {
        DumpCommand::builder()
            .program(self.dump_program.as_str())
            .host(self.connection.host.as_str())
            .port(self.connection.port)
            .username(self.connection.username.as_str())
            .password(self.connection.password.clone())
            .database(database_name)
            .build()
    }

    /// Dumps one database.
    ///
    /// A dry run spawns nothing and touches nothing, and reports a simulated creation.
    /// Any failure removes whatever was written, so `Created` always means a whole dump.
    pub fn run_dump(&self, job: &DumpJob, dry_run: bool, sink: &dyn EventSink) -> Outcome {
        let command = self.dump_command(job.database_name());
        sink.emit(BackupEvent::DumpStarted {
            database: job.database_name.clone(),
            command: command.to_string(),
            dry_run,
        });

        if dry_run {
            sink.emit(BackupEvent::Created {
                path: job.destination_path.clone(),
                simulated: true,
                size: None,
            });
            return Created::builder()
                .path(job.destination_path.as_path())
                .simulated(true)
                .build()
                .into();
        }

        match self.write_dump(job, &command, sink) {
            Ok(size) => {
                sink.emit(BackupEvent::Created {
                    path: job.destination_path.clone(),
                    simulated: false,
                    size: Some(size),
                });
                Created::builder()
                    .path(job.destination_path.as_path())
                    .size(size)
                    .build()
                    .into()
            }
            Err(e) => {
                let reason = e.to_string();
                sink.emit(BackupEvent::Failed {
                    path: job.destination_path.clone(),
                    reason: reason.clone(),
                });
                Outcome::failed(reason)
            }
        }
    }

    fn write_dump(&self, job: &DumpJob, command: &DumpCommand, sink: &dyn EventSink) -> Result<u64> {
        if let Some(dir) = job.destination_path.parent() {
            ensure_dir(dir, false)?;
        }

        stage_and_publish(&job.destination_path, sink, |file| {
            let output = file.try_clone()?;
            if self.compress {
                process::run_piped_to_file(
                    command.to_command(),
                    Command::new(&self.compress_program),
                    output,
                    self.timeout,
                )
            } else {
                process::run_to_file(command.to_command(), output, self.timeout)
            }
        })
        .with_msg(format!("Dumping {} failed", job.database_name))
    }

    /// Dumps every job on `pool`; results come back in job order whatever the parallelism.
    pub fn run_dumps(
        &self,
        jobs: &[DumpJob],
        dry_run: bool,
        pool: &ThreadPool,
        sink: &dyn EventSink,
    ) -> Vec<JobResult<DumpJob>> {
        pool.install(|| {
            jobs.par_iter()
                .map(|job| JobResult::new(job.clone(), self.run_dump(job, dry_run, sink)))
                .collect()
        })
    }
}
