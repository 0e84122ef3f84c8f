#![cfg(not(tarpaulin_include))]

use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use rosterdesk::grouping::{self, GroupingPolicy};
use rosterdesk::query::{self, Direction};
use rosterdesk::{AppConfig, Ingestor, RosterSet, UploadedFile};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Grouping key for the `groups` command
#[derive(Debug, Clone, Copy, ValueEnum)]
enum GroupKey {
    Route,
    Vendor,
}

#[derive(Parser)]
#[command(name = "rosterdesk")]
#[command(version, about = "Inspect roster files from the command line", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the columns of a roster file
    Columns {
        /// CSV or Excel roster
        file: PathBuf,
    },

    /// Print the rows containing a text, case-insensitively
    Search {
        file: PathBuf,
        query: String,
    },

    /// Print the rows sorted by one column
    Sort {
        file: PathBuf,
        column: String,

        /// Sort descending
        #[arg(long)]
        desc: bool,
    },

    /// Print the rows grouped by route or vendor
    Groups {
        file: PathBuf,

        #[arg(long, value_enum, default_value = "route")]
        by: GroupKey,

        /// Start a new group at every key change instead of merging equal keys
        #[arg(long)]
        transitions: bool,
    },
}

fn load(path: &Path, config: &AppConfig) -> Result<RosterSet, Box<dyn std::error::Error>> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let upload = UploadedFile::new(name, fs::read(path)?);
    let roster = Ingestor::new(config.limits.clone()).ingest(Some(&upload))?;
    info!("Loaded {} rows from {}", roster.len(), path.display());
    Ok(roster)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match cli.command {
        Commands::Columns { file } => {
            let roster = load(&file, &config)?;
            print_json(&query::columns(&roster))
        }
        Commands::Search { file, query: text } => {
            let roster = load(&file, &config)?;
            print_json(&query::search(&roster, &text))
        }
        Commands::Sort { file, column, desc } => {
            let roster = load(&file, &config)?;
            let direction = if desc { Direction::Desc } else { Direction::Asc };
            print_json(&query::sort_by(&roster, &column, direction)?)
        }
        Commands::Groups {
            file,
            by,
            transitions,
        } => {
            let roster = load(&file, &config)?;
            let policy = if transitions {
                GroupingPolicy::Transitions
            } else {
                GroupingPolicy::Partition
            };
            let groups = match by {
                GroupKey::Route => grouping::group_by_route(&roster, policy),
                GroupKey::Vendor => grouping::group_by_vendor(&roster, policy),
            };
            print_json(&groups)
        }
    }
}
