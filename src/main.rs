use clap::Parser;
use std::path::PathBuf;
use std::process::exit;
use tracing::{error, info, warn};
use yap_backup::backup::backup_config::load_config;
use yap_backup::backup::events::{TracingSink, DRY_RUN_PREFIX};
use yap_backup::backup::outcome::RunSummary;
use yap_backup::backup::planner::RunPlanner;
use yap_backup::backup::result_error::error::Error;
use yap_backup::logging::{self, LogConfig};

const EXIT_JOB_FAILED: i32 = 1;
const EXIT_CONFIG_ERROR: i32 = 2;

/// Dump MySQL databases and archive directories into a dated backup tree
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Show what would be created without running tools or writing files
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Log at DEBUG level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();

    let log_config = LogConfig {
        verbose: args.verbose,
        log_file: args.log_file.clone(),
    };
    if let Err(e) = logging::init(&log_config) {
        eprintln!("{e}");
        exit(EXIT_CONFIG_ERROR);
    }

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            exit(exit_code(&e));
        }
    };

    if args.dry_run {
        warn!("{DRY_RUN_PREFIX}Dry run: no tools are started and nothing is written");
    }

    let summary = match RunPlanner::new(&config, &TracingSink).run(args.dry_run) {
        Ok(summary) => summary,
        Err(e) => {
            error!("{e}");
            exit(exit_code(&e));
        }
    };

    print_summary(&summary, args.json);

    if summary.has_failures() {
        exit(EXIT_JOB_FAILED);
    }
    info!("Run {} finished", summary.run_timestamp());
}

fn exit_code(error: &Error) -> i32 {
    if error.is_configuration_error() {
        EXIT_CONFIG_ERROR
    } else {
        EXIT_JOB_FAILED
    }
}

fn print_summary(summary: &RunSummary, json: bool) {
    if json {
        match serde_json::to_string_pretty(summary) {
            Ok(s) => println!("{s}"),
            Err(e) => error!("Serialize run summary failed: {e}"),
        }
    } else {
        println!("{summary}");
    }
}
