//! Command-line surface: `extract`, `refactor`, `verify`.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;

use crate::artifacts::read_block_records;
use crate::audit::run_audit;
use crate::config::{RefactorConfig, ScanConfig};
use crate::refactor::{refactor_tree, verify_tree, RefactorEntry};

pub const REFACTOR_REPORT_FILE: &str = "refactor_report.json";
pub const VERIFY_REPORT_FILE: &str = "verify_report.json";

#[derive(Parser, Debug)]
#[command(name = "reposcan", version, about = "Audit inline scripts and styles and relocate the safe ones")]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan a tree, classify every inline block and write the records
    Extract {
        /// Root of the tree to audit
        root: PathBuf,

        /// Output folder for records and extracted files
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// JSON settings file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of threads (0 = auto)
        #[arg(long)]
        threads: Option<usize>,
    },

    /// Copy a tree and apply the recorded actions to the copy
    Refactor {
        /// Original tree (never modified)
        #[arg(long)]
        source: PathBuf,

        /// Destination; must not exist or be empty
        #[arg(long)]
        destination: PathBuf,

        /// Folder holding the extraction records
        #[arg(long)]
        records: PathBuf,

        /// URL prefix for extracted scripts
        #[arg(long)]
        script_base: Option<String>,

        /// URL prefix for extracted styles
        #[arg(long)]
        style_base: Option<String>,

        /// Number of threads (0 = auto)
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Check recorded blocks against a tree without writing
    Verify {
        /// Tree to check
        #[arg(long)]
        root: PathBuf,

        /// Folder holding the extraction records
        #[arg(long)]
        records: PathBuf,
    },
}

/// Initialise `env_logger`. `RUST_LOG` wins over the flag.
pub fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .try_init();
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Extract {
            root,
            output,
            config,
            threads,
        } => {
            let mut scan = match config {
                Some(path) => ScanConfig::load(&path)
                    .with_context(|| format!("loading settings from {}", path.display()))?,
                None => ScanConfig::default(),
            };
            scan.root_folder = root;
            if let Some(output) = output {
                scan.output_folder = output;
            }
            if let Some(threads) = threads {
                scan.threads = threads;
            }
            let report = run_audit(&scan)
                .with_context(|| format!("auditing {}", scan.root_folder.display()))?;
            for (verdict, count) in &report.summary.by_verdict {
                info!("  {:<13} {}", verdict, count);
            }
            Ok(())
        }

        Commands::Refactor {
            source,
            destination,
            records,
            script_base,
            style_base,
            threads,
        } => {
            let mut config = RefactorConfig {
                threads,
                ..RefactorConfig::default()
            };
            if let Some(base) = script_base {
                config.script_base = base;
            }
            if let Some(base) = style_base {
                config.style_base = base;
            }
            let entries = load_entries(&records)?;
            let report = refactor_tree(&source, &destination, &entries, &config).with_context(|| {
                format!("refactoring {} into {}", source.display(), destination.display())
            })?;
            write_report(&records.join(REFACTOR_REPORT_FILE), &report)
        }

        Commands::Verify { root, records } => {
            let entries = load_entries(&records)?;
            let report = verify_tree(&root, &entries)
                .with_context(|| format!("verifying {}", root.display()))?;
            write_report(&records.join(VERIFY_REPORT_FILE), &report)
        }
    }
}

fn load_entries(records: &Path) -> Result<Vec<RefactorEntry>> {
    let blocks = read_block_records(records)
        .with_context(|| format!("reading records from {}", records.display()))?;
    Ok(blocks.iter().map(RefactorEntry::from).collect())
}

fn write_report<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    info!("Report written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extract() {
        let cli = Cli::try_parse_from(["reposcan", "extract", "site", "-o", "out", "--threads", "4"]).unwrap();
        match cli.command {
            Commands::Extract { root, output, threads, .. } => {
                assert_eq!(root, PathBuf::from("site"));
                assert_eq!(output, Some(PathBuf::from("out")));
                assert_eq!(threads, Some(4));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_refactor_requires_destination() {
        assert!(Cli::try_parse_from(["reposcan", "refactor", "--source", "a", "--records", "r"]).is_err());
        let cli = Cli::try_parse_from([
            "reposcan", "-v", "refactor", "--source", "a", "--destination", "b", "--records", "r",
            "--script-base", "/static/js",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Refactor { script_base: Some(ref b), .. } if b == "/static/js"
        ));
    }
}
