//! # yap-backup
//!
//! One-shot backups of MySQL databases and filesystem trees.
//!
//! ## Features
//!
//! - **Database dumps**: one `mysqldump` per database, optionally piped through `gzip`
//! - **File archives**: `.tar.gz` per configured source or bundle of sources
//! - **Dry run**: a complete summary of what would be created without touching disk
//! - **No partial artifacts**: output is staged and only published once complete
//! - **Parallel jobs**: dumps and archives run on a bounded worker pool
//!
//! ## Quick Start
//!
//! ```no_run
//! use yap_backup::backup::backup_config::load_config;
//! use yap_backup::backup::events::TracingSink;
//! use yap_backup::backup::planner::RunPlanner;
//!
//! let config = load_config("config.yaml")?;
//! let summary = RunPlanner::new(&config, &TracingSink).run(false)?;
//! println!("{summary}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
pub mod logging;
