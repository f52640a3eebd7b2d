//! Gzip'd tarballs of configured source paths.
//!
//! Each existing source becomes one top-level entry named after its base name;
//! directories bring their whole subtree along. Missing sources are skipped.

use crate::backup::events::{BackupEvent, EventSink};
use crate::backup::outcome::{Created, JobResult, Outcome};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use crate::backup::staging::{ensure_dir, stage_and_publish};
use flate2::write::GzEncoder;
use flate2::Compression;
use getset::Getters;
use itertools::Itertools;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, IntoInnerError, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const TAR_GZ_SUFFIX: &str = ".tar.gz";

/// One archive to build from one or more source paths.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Getters)]
#[getset(get = "pub")]
pub struct ArchiveJob {
    source_paths: Vec<PathBuf>,
    archive_root: PathBuf,
    /// Always ends with [`TAR_GZ_SUFFIX`]
    archive_name: String,
    archive_path: PathBuf,
}

impl ArchiveJob {
    pub fn new<R: AsRef<Path>, S: Into<String>>(
        source_paths: Vec<PathBuf>,
        archive_root: R,
        archive_name: S,
    ) -> Self {
        let archive_name = normalize_archive_name(archive_name);
        let archive_root = archive_root.as_ref().to_path_buf();
        let archive_path = archive_root.join(&archive_name);
        Self {
            source_paths,
            archive_root,
            archive_name,
            archive_path,
        }
    }
}

pub fn normalize_archive_name<S: Into<String>>(name: S) -> String {
    let mut name = name.into();
    if !name.ends_with(TAR_GZ_SUFFIX) {
        name.push_str(TAR_GZ_SUFFIX);
    }
    name
}

/// A source that exists, with the entry name it gets inside the archive.
#[derive(Debug)]
struct PresentSource<'a> {
    path: &'a Path,
    entry_name: String,
}

#[derive(Clone, Copy, Debug)]
pub struct ArchivePipeline {
    compression: Compression,
}

impl Default for ArchivePipeline {
    fn default() -> Self {
        Self::new(Compression::default().level())
    }
}

impl ArchivePipeline {
    pub fn new(compression_level: u32) -> Self {
        Self {
            compression: Compression::new(compression_level),
        }
    }

    /// Builds one archive.
    ///
    /// Missing sources are reported and left out; the job fails only when the
    /// archive itself cannot be written, in which case nothing is left behind.
    pub fn run_archive(&self, job: &ArchiveJob, dry_run: bool, sink: &dyn EventSink) -> Outcome {
        sink.emit(BackupEvent::ArchiveStarted {
            archive: job.archive_path.clone(),
            dry_run,
        });

        let (present, missing): (Vec<_>, Vec<_>) = job
            .source_paths
            .iter()
            .partition(|p| p.exists());
        for source in &missing {
            sink.emit(BackupEvent::EntrySkipped {
                archive: job.archive_path.clone(),
                source: source.to_path_buf(),
                dry_run,
            });
        }
        let skipped_entries = missing.into_iter().cloned().collect_vec();

        let present = match entry_names(&present) {
            Ok(p) => p,
            Err(e) => return self.fail(job, e, sink),
        };

        if present.is_empty() {
            let reason = "no source paths exist".to_string();
            sink.emit(BackupEvent::JobSkipped {
                path: job.archive_path.clone(),
                reason: reason.clone(),
                dry_run,
            });
            return Outcome::skipped(reason);
        }

        if dry_run {
            for source in &present {
                sink.emit(BackupEvent::EntryAdded {
                    archive: job.archive_path.clone(),
                    source: source.path.to_path_buf(),
                    entry_name: source.entry_name.clone(),
                    entry_count: count_entries(source.path),
                    dry_run,
                });
            }
            sink.emit(BackupEvent::Created {
                path: job.archive_path.clone(),
                simulated: true,
                size: None,
            });
            return Created::builder()
                .path(job.archive_path.as_path())
                .simulated(true)
                .skipped_entries(skipped_entries)
                .build()
                .into();
        }

        match self.write_archive(job, &present, sink) {
            Ok(size) => {
                sink.emit(BackupEvent::Created {
                    path: job.archive_path.clone(),
                    simulated: false,
                    size: Some(size),
                });
                Created::builder()
                    .path(job.archive_path.as_path())
                    .size(size)
                    .skipped_entries(skipped_entries)
                    .build()
                    .into()
            }
            Err(e) => self.fail(job, e, sink),
        }
    }

    fn fail(&self, job: &ArchiveJob, error: Error, sink: &dyn EventSink) -> Outcome {
        let reason = error.to_string();
        sink.emit(BackupEvent::Failed {
            path: job.archive_path.clone(),
            reason: reason.clone(),
        });
        Outcome::failed(reason)
    }

    fn write_archive(
        &self,
        job: &ArchiveJob,
        present: &[PresentSource],
        sink: &dyn EventSink,
    ) -> Result<u64> {
        ensure_dir(&job.archive_root, false)?;

        stage_and_publish(&job.archive_path, sink, |file| {
            self.write_entries(file, &job.archive_path, present, sink)
        })
        .with_msg(format!("Creating archive {:?} failed", job.archive_path))
    }

    fn write_entries(
        &self,
        file: &File,
        archive: &Path,
        present: &[PresentSource],
        sink: &dyn EventSink,
    ) -> Result<()> {
        let mut writer = tar::Builder::new(GzEncoder::new(BufWriter::new(file), self.compression));
        writer.follow_symlinks(false);

        for source in present {
            let entry_count = append_tree(&mut writer, source, |path| {
                sink.emit(BackupEvent::SpecialFileSkipped {
                    archive: archive.to_path_buf(),
                    path: path.to_path_buf(),
                })
            })?;
            sink.emit(BackupEvent::EntryAdded {
                archive: archive.to_path_buf(),
                source: source.path.to_path_buf(),
                entry_name: source.entry_name.clone(),
                entry_count,
                dry_run: false,
            });
        }

        let mut file = writer
            .into_inner()?
            .finish()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    /// Builds every job on `pool`; results come back in job order.
    pub fn run_archives(
        &self,
        jobs: &[ArchiveJob],
        dry_run: bool,
        pool: &ThreadPool,
        sink: &dyn EventSink,
    ) -> Vec<JobResult<ArchiveJob>> {
        pool.install(|| {
            jobs.par_iter()
                .map(|job| JobResult::new(job.clone(), self.run_archive(job, dry_run, sink)))
                .collect()
        })
    }
}

/// Pairs each source with its base name, refusing two sources with the same one.
fn entry_names<'a>(present: &[&'a PathBuf]) -> Result<Vec<PresentSource<'a>>> {
    let present = present
        .iter()
        .map(|&path| {
            path.file_name()
                .map(|name| PresentSource {
                    path: path.as_path(),
                    entry_name: name.to_string_lossy().into_owned(),
                })
                .ok_or_else(|| {
                    Error::from(std::io::Error::other(format!(
                        "{:?} has no base name to archive it under",
                        path
                    )))
                })
        })
        .collect::<Result<Vec<_>>>()?;

    if let Some((name, group)) = present
        .iter()
        .into_group_map_by(|s| s.entry_name.as_str())
        .into_iter()
        .find(|(_, group)| group.len() > 1)
    {
        return Err(Error::DuplicateEntryName {
            name: name.to_string(),
            sources: group.iter().map(|s| s.path.to_path_buf()).collect(),
        });
    }

    Ok(present)
}

/// Walks a source without following symlinks, the source itself included:
/// a symlinked source is stored as the link.
fn walk(path: &Path) -> WalkDir {
    WalkDir::new(path)
        .follow_links(false)
        .follow_root_links(false)
        .sort_by_file_name()
}

#[cfg(unix)]
fn is_socket(file_type: std::fs::FileType) -> bool {
    use std::os::unix::fs::FileTypeExt;
    file_type.is_socket()
}

#[cfg(not(unix))]
fn is_socket(_file_type: std::fs::FileType) -> bool {
    false
}

/// Appends `source` and everything below it under its entry name. Returns the
/// number of entries written. Sockets are handed to `on_skipped` instead.
fn append_tree<W, F>(writer: &mut tar::Builder<W>, source: &PresentSource, mut on_skipped: F) -> Result<u64>
where
    W: Write,
    F: FnMut(&Path),
{
    let mut count = 0;
    for entry in walk(source.path) {
        let entry = entry
            .map_err(Error::from)
            .with_debug_object_and_fn_name(source.path.to_path_buf(), "append_tree")?;
        if is_socket(entry.file_type()) {
            on_skipped(entry.path());
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(source.path)
            .map_err(std::io::Error::other)?;
        let name = if relative.as_os_str().is_empty() {
            PathBuf::from(&source.entry_name)
        } else {
            Path::new(&source.entry_name).join(relative)
        };
        writer
            .append_path_with_name(entry.path(), &name)
            .map_err(Error::from)
            .with_msg(format!("Adding {:?} as {:?} failed", entry.path(), name))?;
        count += 1;
    }
    Ok(count)
}

fn count_entries(path: &Path) -> u64 {
    walk(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| !is_socket(e.file_type()))
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::events::MemorySink;
    use flate2::read::GzDecoder;
    use rayon::ThreadPoolBuilder;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn create_sources(dir: &Path) {
        std::fs::create_dir_all(dir.join("docs/reports")).unwrap();
        std::fs::write(dir.join("docs/readme.txt"), "readme").unwrap();
        std::fs::write(dir.join("docs/reports/q1.csv"), "1,2,3").unwrap();
        std::fs::create_dir_all(dir.join("photos")).unwrap();
        std::fs::write(dir.join("photos/cat.jpg"), "meow").unwrap();
        std::fs::write(dir.join("notes.txt"), "note").unwrap();
    }

    fn entry_paths(archive: &Path) -> Vec<String> {
        let file = File::open(archive).unwrap();
        let mut tar = ::tar::Archive::new(GzDecoder::new(file));
        tar.entries()
            .unwrap()
            .map(|e| {
                e.unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .trim_end_matches('/')
                    .to_string()
            })
            .collect()
    }

    fn entry_kinds(archive: &Path) -> Vec<(String, ::tar::EntryType)> {
        let file = File::open(archive).unwrap();
        let mut tar = ::tar::Archive::new(GzDecoder::new(file));
        tar.entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                let path = e.path().unwrap().to_string_lossy().into_owned();
                (path, e.header().entry_type())
            })
            .collect()
    }

    fn dir_names(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    fn top_level(entries: &[String]) -> BTreeSet<String> {
        entries
            .iter()
            .map(|e| e.split('/').next().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_normalize_archive_name() {
        assert_eq!(normalize_archive_name("nightly"), "nightly.tar.gz");
        assert_eq!(normalize_archive_name("nightly.tar.gz"), "nightly.tar.gz");
        let job = ArchiveJob::new(vec![], "/b", "nightly");
        assert_eq!(job.archive_path(), Path::new("/b/nightly.tar.gz"));
    }

    #[test]
    fn test_archive_contains_existing_sources_only() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("a");
        create_sources(&src);
        let out = temp_dir.path().join("out/2026");
        let job = ArchiveJob::new(
            vec![src.join("docs"), src.join("missing"), src.join("photos")],
            &out,
            "nightly",
        );
        let sink = MemorySink::new();

        let outcome = ArchivePipeline::default().run_archive(&job, false, &sink);

        let created = outcome.created().expect("archive should be created");
        assert_eq!(created.path(), &out.join("nightly.tar.gz"));
        assert_eq!(created.skipped_entries(), &vec![src.join("missing")]);
        assert!(created.size().unwrap() > 0);

        let entries = entry_paths(&out.join("nightly.tar.gz"));
        assert_eq!(
            top_level(&entries),
            BTreeSet::from(["docs".to_string(), "photos".to_string()])
        );
        assert!(entries.contains(&"docs/reports/q1.csv".to_string()));
        assert!(entries.contains(&"photos/cat.jpg".to_string()));
        assert_eq!(
            std::fs::read_dir(&out).unwrap().count(),
            1,
            "no staging file may remain"
        );

        let skipped = sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, BackupEvent::EntrySkipped { .. }))
            .count();
        assert_eq!(skipped, 1);
    }

    #[test]
    fn test_single_file_source_keeps_base_name() {
        let temp_dir = TempDir::new().unwrap();
        create_sources(temp_dir.path());
        let job = ArchiveJob::new(
            vec![temp_dir.path().join("notes.txt")],
            temp_dir.path().join("out"),
            "notes.tar.gz",
        );

        let outcome = ArchivePipeline::new(9).run_archive(&job, false, &MemorySink::new());

        assert!(outcome.is_created());
        assert_eq!(entry_paths(job.archive_path()), vec!["notes.txt".to_string()]);
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let temp_dir = TempDir::new().unwrap();
        create_sources(temp_dir.path());
        let out = temp_dir.path().join("out");
        let job = ArchiveJob::new(
            vec![temp_dir.path().join("docs"), temp_dir.path().join("missing")],
            &out,
            "nightly",
        );
        let sink = MemorySink::new();

        let outcome = ArchivePipeline::default().run_archive(&job, true, &sink);

        let created = outcome.created().unwrap();
        assert!(created.simulated());
        assert_eq!(created.size(), None);
        assert_eq!(created.skipped_entries().len(), 1);
        assert!(!out.exists());

        let added = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                BackupEvent::EntryAdded {
                    entry_name,
                    entry_count,
                    dry_run,
                    ..
                } => Some((entry_name, entry_count, dry_run)),
                _ => None,
            })
            .collect_vec();
        // docs, docs/readme.txt, docs/reports, docs/reports/q1.csv
        assert_eq!(added, vec![("docs".to_string(), 4, true)]);
    }

    #[test]
    fn test_no_existing_source_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("out");
        let job = ArchiveJob::new(vec![temp_dir.path().join("missing")], &out, "nightly");

        let outcome = ArchivePipeline::default().run_archive(&job, false, &MemorySink::new());

        assert!(matches!(outcome, Outcome::Skipped { .. }));
        assert!(!job.archive_path().exists());
    }

    #[test]
    fn test_duplicate_base_names_fail_without_output() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("a/docs")).unwrap();
        std::fs::create_dir_all(temp_dir.path().join("b/docs")).unwrap();
        let out = temp_dir.path().join("out");
        let job = ArchiveJob::new(
            vec![temp_dir.path().join("a/docs"), temp_dir.path().join("b/docs")],
            &out,
            "nightly",
        );

        let outcome = ArchivePipeline::default().run_archive(&job, false, &MemorySink::new());

        match outcome {
            Outcome::Failed { reason } => assert!(reason.contains("\"docs\"")),
            o => panic!("Expected failure, got {o:?}"),
        }
        assert!(!out.exists());
    }

    #[test]
    fn test_unwritable_root_fails_and_batch_continues() {
        let temp_dir = TempDir::new().unwrap();
        create_sources(temp_dir.path());
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "a file where a directory should be").unwrap();
        let jobs = vec![
            ArchiveJob::new(vec![temp_dir.path().join("docs")], &blocker, "first"),
            ArchiveJob::new(
                vec![temp_dir.path().join("photos")],
                temp_dir.path().join("out"),
                "second",
            ),
        ];
        let pool = ThreadPoolBuilder::new().num_threads(2).build().unwrap();

        let results =
            ArchivePipeline::default().run_archives(&jobs, false, &pool, &MemorySink::new());

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].job(), &jobs[0]);
        assert!(results[0].outcome().is_failed());
        assert_eq!(results[1].job(), &jobs[1]);
        assert!(results[1].outcome().is_created());
    }

    #[test]
    fn test_failed_publish_leaves_no_staging_file() {
        let temp_dir = TempDir::new().unwrap();
        create_sources(temp_dir.path());
        let out = temp_dir.path().join("out");
        let job = ArchiveJob::new(vec![temp_dir.path().join("docs")], &out, "nightly");
        std::fs::create_dir_all(job.archive_path().join("occupied")).unwrap();

        let outcome = ArchivePipeline::default().run_archive(&job, false, &MemorySink::new());

        assert!(outcome.is_failed());
        assert_eq!(dir_names(&out), vec!["nightly.tar.gz".to_string()]);
        assert!(job.archive_path().is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_fails_job_and_cleans_up() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        create_sources(temp_dir.path());
        let locked = temp_dir.path().join("docs/reports/q1.csv");
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        if File::open(&locked).is_ok() {
            // Permission bits are not enforced for this user (root).
            return;
        }
        let out = temp_dir.path().join("out");
        let job = ArchiveJob::new(vec![temp_dir.path().join("docs")], &out, "nightly");
        let sink = MemorySink::new();

        let outcome = ArchivePipeline::default().run_archive(&job, false, &sink);

        match &outcome {
            Outcome::Failed { reason } => assert!(reason.contains("q1.csv")),
            o => panic!("Expected failure, got {o:?}"),
        }
        assert!(dir_names(&out).is_empty());
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, BackupEvent::CleanedUp { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_source_is_stored_as_link() {
        let temp_dir = TempDir::new().unwrap();
        create_sources(&temp_dir.path().join("real"));
        let link_dir = temp_dir.path().join("links");
        std::fs::create_dir_all(&link_dir).unwrap();
        std::os::unix::fs::symlink(temp_dir.path().join("real/docs"), link_dir.join("docs")).unwrap();
        let job = ArchiveJob::new(vec![link_dir.join("docs")], temp_dir.path().join("out"), "nightly");
        let sink = MemorySink::new();

        let outcome = ArchivePipeline::default().run_archive(&job, false, &sink);
        assert!(outcome.is_created());
        assert_eq!(
            entry_kinds(job.archive_path()),
            vec![("docs".to_string(), ::tar::EntryType::Symlink)]
        );

        ArchivePipeline::default().run_archive(&job, true, &sink);
        let dry_counts = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                BackupEvent::EntryAdded { entry_count, dry_run: true, .. } => Some(entry_count),
                _ => None,
            })
            .collect_vec();
        assert_eq!(dry_counts, vec![1]);
    }

    #[cfg(unix)]
    #[test]
    fn test_socket_is_skipped_and_archive_still_created() {
        let temp_dir = TempDir::new().unwrap();
        let home = temp_dir.path().join("home");
        std::fs::create_dir_all(home.join(".gnupg")).unwrap();
        std::fs::write(home.join("notes.txt"), "note").unwrap();
        let socket = home.join(".gnupg/S.agent");
        let _listener = std::os::unix::net::UnixListener::bind(&socket).unwrap();
        let job = ArchiveJob::new(vec![home.clone()], temp_dir.path().join("out"), "home");
        let sink = MemorySink::new();

        let outcome = ArchivePipeline::default().run_archive(&job, false, &sink);

        assert!(outcome.is_created(), "{outcome:?}");
        let entries = entry_paths(job.archive_path());
        assert!(entries.contains(&"home/notes.txt".to_string()));
        assert!(entries.contains(&"home/.gnupg".to_string()));
        assert!(!entries.iter().any(|e| e.ends_with("S.agent")));
        assert!(sink.events().contains(&BackupEvent::SpecialFileSkipped {
            archive: job.archive_path().clone(),
            path: socket,
        }));
    }

    #[test]
    fn test_rerun_into_existing_directory() {
        let temp_dir = TempDir::new().unwrap();
        create_sources(temp_dir.path());
        let out = temp_dir.path().join("out");
        let pipeline = ArchivePipeline::default();

        for name in ["first", "second"] {
            let job = ArchiveJob::new(vec![temp_dir.path().join("photos")], &out, name);
            assert!(pipeline
                .run_archive(&job, false, &MemorySink::new())
                .is_created());
        }
    }
}
