use crate::backup::dump::DumpJob;
use crate::backup::events::DRY_RUN_PREFIX;
use crate::backup::tar::ArchiveJob;
use bon::Builder;
use getset::{CopyGetters, Getters};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// An artifact that was written, or that a dry run would have written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Builder, Getters, CopyGetters)]
pub struct Created {
    #[builder(into)]
    #[getset(get = "pub")]
    path: PathBuf,
    /// `true` when produced by a dry run; nothing exists on disk
    #[builder(default)]
    #[getset(get_copy = "pub")]
    simulated: bool,
    /// Final size on disk, only known for real runs
    #[getset(get_copy = "pub")]
    size: Option<u64>,
    /// Sources of an archive job that did not exist and were left out
    #[builder(default)]
    #[getset(get = "pub")]
    skipped_entries: Vec<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Created(Created),
    Skipped { reason: String },
    Failed { reason: String },
}

impl Outcome {
    pub fn skipped<S: Into<String>>(reason: S) -> Self {
        Outcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn failed<S: Into<String>>(reason: S) -> Self {
        Outcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Outcome::Created(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    pub fn created(&self) -> Option<&Created> {
        match self {
            Outcome::Created(c) => Some(c),
            _ => None,
        }
    }
}

impl From<Created> for Outcome {
    fn from(value: Created) -> Self {
        Outcome::Created(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Getters)]
#[getset(get = "pub")]
pub struct JobResult<J> {
    job: J,
    outcome: Outcome,
}

impl<J> JobResult<J> {
    pub fn new(job: J, outcome: Outcome) -> Self {
        Self { job, outcome }
    }
}

/// Every job outcome of one run, in the order the jobs were planned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Getters, CopyGetters)]
pub struct RunSummary {
    #[getset(get = "pub")]
    run_timestamp: String,
    #[getset(get_copy = "pub")]
    dry_run: bool,
    #[getset(get = "pub")]
    dump_results: Vec<JobResult<DumpJob>>,
    #[getset(get = "pub")]
    archive_results: Vec<JobResult<ArchiveJob>>,
}

impl RunSummary {
    pub fn new(
        run_timestamp: String,
        dry_run: bool,
        dump_results: Vec<JobResult<DumpJob>>,
        archive_results: Vec<JobResult<ArchiveJob>>,
    ) -> Self {
        Self {
            run_timestamp,
            dry_run,
            dump_results,
            archive_results,
        }
    }

    pub fn created_dumps(&self) -> usize {
        self.dump_results
            .iter()
            .filter(|r| r.outcome.is_created())
            .count()
    }

    pub fn created_archives(&self) -> usize {
        self.archive_results
            .iter()
            .filter(|r| r.outcome.is_created())
            .count()
    }

    /// Destination path and reason of every failed job, dumps first.
    pub fn failures(&self) -> Vec<(&Path, &str)> {
        let dumps = self.dump_results.iter().filter_map(|r| match &r.outcome {
            Outcome::Failed { reason } => Some((r.job.destination_path().as_path(), reason.as_str())),
            _ => None,
        });
        let archives = self.archive_results.iter().filter_map(|r| match &r.outcome {
            Outcome::Failed { reason } => Some((r.job.archive_path().as_path(), reason.as_str())),
            _ => None,
        });
        dumps.chain(archives).collect()
    }

    pub fn has_failures(&self) -> bool {
        self.dump_results
            .iter()
            .map(|r| &r.outcome)
            .chain(self.archive_results.iter().map(|r| &r.outcome))
            .any(Outcome::is_failed)
    }
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let prefix = if self.dry_run { DRY_RUN_PREFIX } else { "" };
        writeln!(
            f,
            "{prefix}Created {} MySQL dump files",
            self.created_dumps()
        )?;
        writeln!(
            f,
            "{prefix}Created {} gzip'd tarballs",
            self.created_archives()
        )?;

        let failures = self.failures();
        for (path, reason) in &failures {
            writeln!(f, "Failed {:?}:\n{}", path, indent::indent_all_with("  ", *reason))?;
        }

        if self.dry_run {
            write!(f, "{prefix}Dry run completed - no actual backups were created")
        } else if failures.is_empty() {
            write!(f, "Backup completed successfully!")
        } else {
            write!(f, "Backup completed with {} failed job(s)", failures.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dump_job(name: &str) -> DumpJob {
        DumpJob::new(name, Path::new("/b/mysql_backups"), "2026-01-01_000000", true)
    }

    fn archive_job(name: &str) -> ArchiveJob {
        ArchiveJob::new(vec![PathBuf::from("/a/docs")], "/b", name)
    }

    fn created(path: &Path, simulated: bool) -> Outcome {
        Created::builder()
            .path(path)
            .simulated(simulated)
            .build()
            .into()
    }

    #[test]
    fn test_counts_and_failures() {
        let ok = dump_job("app");
        let bad = dump_job("analytics");
        let summary = RunSummary::new(
            "2026-01-01_000000".into(),
            false,
            vec![
                JobResult::new(ok.clone(), created(ok.destination_path(), false)),
                JobResult::new(bad.clone(), Outcome::failed("exit status: 2")),
            ],
            vec![JobResult::new(archive_job("docs"), Outcome::skipped("no source paths exist"))],
        );

        assert_eq!(summary.created_dumps(), 1);
        assert_eq!(summary.created_archives(), 0);
        assert!(summary.has_failures());
        assert_eq!(
            summary.failures(),
            vec![(bad.destination_path().as_path(), "exit status: 2")]
        );

        let report = summary.to_string();
        assert!(report.contains("Created 1 MySQL dump files"));
        assert!(report.contains("Created 0 gzip'd tarballs"));
        assert!(report.contains("exit status: 2"));
        assert!(report.ends_with("Backup completed with 1 failed job(s)"));
    }

    #[test]
    fn test_dry_run_report_is_prefixed() {
        let job = archive_job("docs");
        let summary = RunSummary::new(
            "2026-01-01_000000".into(),
            true,
            vec![],
            vec![JobResult::new(job.clone(), created(job.archive_path(), true))],
        );

        assert!(!summary.has_failures());
        let report = summary.to_string();
        assert!(report.contains("DRYRUN::Created 1 gzip'd tarballs"));
        assert!(report.ends_with("DRYRUN::Dry run completed - no actual backups were created"));
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(Outcome::failed("boom")).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "boom");

        let json = serde_json::to_value(created(Path::new("/x.tar.gz"), true)).unwrap();
        assert_eq!(json["status"], "created");
        assert_eq!(json["simulated"], true);
    }
}
