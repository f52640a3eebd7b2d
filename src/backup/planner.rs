use crate::backup::backup_config::BackupConfig;
use crate::backup::dump::{DumpJob, DumpPipeline};
use crate::backup::events::EventSink;
use crate::backup::outcome::RunSummary;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::tar::{ArchiveJob, ArchivePipeline};
use chrono::{DateTime, Datelike, Local, TimeZone};
use getset::{CopyGetters, Getters};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tracing::info;

/// Shared by every artifact name of one run
pub static RUN_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S";
/// Length of a timestamp rendered with [`RUN_TIMESTAMP_FORMAT`], e.g. `2026-10-18_013005`
pub const RUN_TIMESTAMP_LEN: usize = 17;
pub static MYSQL_BACKUP_DIR: &str = "mysql_backups";

/// Fixed facts about one run, decided once when it starts.
#[derive(Clone, Debug, PartialEq, Eq, Getters, CopyGetters)]
pub struct RunContext {
    #[getset(get = "pub")]
    run_timestamp: String,
    /// `<configured root>/<year>`
    #[getset(get = "pub")]
    backup_root: PathBuf,
    #[getset(get_copy = "pub")]
    dry_run: bool,
}

impl RunContext {
    pub fn new<P, T>(configured_root: P, started_at: DateTime<T>, dry_run: bool) -> Self
    where
        P: AsRef<Path>,
        T: TimeZone,
        T::Offset: Display,
    {
        Self {
            run_timestamp: started_at.format(RUN_TIMESTAMP_FORMAT).to_string(),
            backup_root: configured_root
                .as_ref()
                .join(format!("{:04}", started_at.year())),
            dry_run,
        }
    }

    pub fn mysql_dir(&self) -> PathBuf {
        self.backup_root.join(MYSQL_BACKUP_DIR)
    }
}

/// Turns the configuration into jobs, runs them and collects the summary.
pub struct RunPlanner<'a> {
    config: &'a BackupConfig,
    sink: &'a dyn EventSink,
    dumps: DumpPipeline,
    archives: ArchivePipeline,
}

impl<'a> RunPlanner<'a> {
    pub fn new(config: &'a BackupConfig, sink: &'a dyn EventSink) -> Self {
        Self {
            config,
            sink,
            dumps: DumpPipeline::from(config.mysql()),
            archives: ArchivePipeline::new(config.file_backups().compression_level()),
        }
    }

    pub fn context<T>(&self, started_at: DateTime<T>, dry_run: bool) -> RunContext
    where
        T: TimeZone,
        T::Offset: Display,
    {
        RunContext::new(self.config.backup().root_path(), started_at, dry_run)
    }

    pub fn dump_jobs(&self, ctx: &RunContext) -> Vec<DumpJob> {
        let dir = ctx.mysql_dir();
        self.config
            .mysql()
            .databases()
            .iter()
            .map(|db| self.dumps.job(db, &dir, &ctx.run_timestamp))
            .collect()
    }

    pub fn archive_jobs(&self, ctx: &RunContext) -> Vec<ArchiveJob> {
        self.config
            .file_backups()
            .sources()
            .iter()
            .map(|source| {
                ArchiveJob::new(
                    source.paths().to_vec(),
                    &ctx.backup_root,
                    format!("{}_{}", source.archive_stem(), ctx.run_timestamp),
                )
            })
            .collect()
    }

    /// Runs every job once, timestamped with the current local time.
    pub fn run(&self, dry_run: bool) -> Result<RunSummary> {
        self.run_with(&self.context(Local::now(), dry_run))
    }

    /// Dumps first, archives second. Only failing to set up the worker pool is an error;
    /// job failures end up in the summary.
    pub fn run_with(&self, ctx: &RunContext) -> Result<RunSummary> {
        let pool = self.thread_pool()?;

        let dump_jobs = self.dump_jobs(ctx);
        info!(
            "Running {} database dump(s) into {:?}",
            dump_jobs.len(),
            ctx.mysql_dir()
        );
        let dump_results = self
            .dumps
            .run_dumps(&dump_jobs, ctx.dry_run, &pool, self.sink);

        let archive_jobs = self.archive_jobs(ctx);
        info!(
            "Running {} archive job(s) into {:?}",
            archive_jobs.len(),
            ctx.backup_root
        );
        let archive_results = self
            .archives
            .run_archives(&archive_jobs, ctx.dry_run, &pool, self.sink);

        Ok(RunSummary::new(
            ctx.run_timestamp.clone(),
            ctx.dry_run,
            dump_results,
            archive_results,
        ))
    }

    fn thread_pool(&self) -> Result<ThreadPool> {
        let threads = self.config.backup().parallel_jobs();
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("backup-job-{i}"))
            .build()
            .map_err(Error::from)
            .with_msg(format!("Create pool of {threads} job thread(s) failed"))
    }
}
