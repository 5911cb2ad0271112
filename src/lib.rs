pub mod config;
pub mod ingest;
pub mod model;
pub mod search;
pub mod storage;
pub mod tree;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use config::Config;
use ingest::{IngestOptions, IngestProgress};
use model::types::CatalogEntry;
use search::{SearchEngine, SearchRequest};
use storage::SqliteStorage;
use tree::NavigationEngine;

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "ccs",
    version,
    about = "Searchable construction cost catalog from regional price list XML"
)]
pub struct Cli {
    /// Path to the SQLite database (defaults to platform data dir)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Config file override (defaults to platform config dir)
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest a catalog XML document, replacing any existing data
    Init {
        /// Source XML file (falls back to `source_path` from the config file)
        source: Option<PathBuf>,

        /// Records per transaction
        #[arg(long)]
        batch_size: Option<usize>,

        /// Re-ingest even if the database is already populated
        #[arg(long)]
        force: bool,
    },
    /// Show database location and record counts
    Status,
    /// Search catalog entries
    Search {
        /// Substring to match (blank matches everything)
        term: Option<String>,

        /// Only entries classified down to this level (1-11)
        #[arg(long)]
        level: Option<i64>,

        /// 1-indexed page number
        #[arg(long, default_value_t = 1)]
        page: i64,

        #[arg(long, default_value_t = search::DEFAULT_PAGE_SIZE)]
        page_size: i64,

        /// Match codes at the deepest populated levels instead of descriptions
        #[arg(long)]
        from_end: bool,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Browse the classification hierarchy one level at a time
    Tree {
        /// Compound key of the node to expand (omit for the roots)
        parent: Option<String>,

        /// Level of the parent node (defaults to its key's segment count)
        #[arg(long)]
        level: Option<i64>,

        #[arg(long)]
        json: bool,
    },
    /// Show one entry with its resource breakdown
    Show {
        code: String,

        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);
    let config = Config::load(&config_path)?;
    let db_path = cli
        .db
        .clone()
        .or_else(|| config.db_path.clone())
        .unwrap_or_else(default_db_path);

    match cli.command {
        Commands::Init {
            source,
            batch_size,
            force,
        } => run_init(&db_path, &config, source, batch_size, force),
        Commands::Status => run_status(&db_path),
        Commands::Search {
            term,
            level,
            page,
            page_size,
            from_end,
            json,
        } => {
            let storage = SqliteStorage::open(&db_path)?;
            let request = SearchRequest {
                term: term.unwrap_or_default(),
                level,
                page_number: page,
                page_size,
                search_from_end: from_end,
            };
            let page = SearchEngine::new(&storage).search(&request)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&page)?);
            } else {
                for entry in &page.results {
                    println!("{}  {}", entry.entry_code, entry.description);
                }
                println!(
                    "page {} of {} ({} match{})",
                    page.page_number,
                    page.total_pages,
                    page.total_count,
                    if page.total_count == 1 { "" } else { "es" },
                );
            }
            Ok(())
        }
        Commands::Tree {
            parent,
            level,
            json,
        } => {
            let storage = SqliteStorage::open(&db_path)?;
            let engine = NavigationEngine::new(&storage);
            let nodes = match parent.as_deref() {
                None | Some("") => engine.roots()?,
                Some(key) => {
                    let level = level
                        .unwrap_or_else(|| key.split(tree::KEY_DELIMITER).count() as i64);
                    engine.children_of(level, key)?
                }
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&nodes)?);
            } else if nodes.is_empty() {
                println!("(no children)");
            } else {
                for node in &nodes {
                    let marker = if node.has_children { "+" } else { "-" };
                    println!("{marker} [{}] {}  {}", node.level, node.code, node.description);
                }
            }
            Ok(())
        }
        Commands::Show { code, json } => {
            let storage = SqliteStorage::open(&db_path)?;
            match storage.entry_by_code(&code)? {
                Some(entry) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&entry)?);
                    } else {
                        print_entry(&entry);
                    }
                }
                None => println!("no entry with code {code}"),
            }
            Ok(())
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "ccs", &mut std::io::stdout());
            Ok(())
        }
        Commands::Man => {
            let cmd = Cli::command();
            let man = clap_mangen::Man::new(cmd);
            let mut out = std::io::stdout();
            man.render(&mut out)?;
            Ok(())
        }
    }
}

fn run_init(
    db_path: &Path,
    config: &Config,
    source: Option<PathBuf>,
    batch_size: Option<usize>,
    force: bool,
) -> Result<()> {
    let Some(source) = source.or_else(|| config.source_path.clone()) else {
        bail!("no source given: pass a path or set source_path in the config file");
    };

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating data dir {}", parent.display()))?;
    }
    let mut storage = SqliteStorage::open(db_path)?;
    if storage.is_populated()? && !force {
        println!(
            "database already holds {} entries; use --force to re-ingest",
            storage.entry_count()?
        );
        return Ok(());
    }

    let progress = Arc::new(IngestProgress::default());
    let options = IngestOptions {
        batch_size: batch_size.unwrap_or_else(|| config.batch_size()),
        progress: Some(progress.clone()),
        cancel: None,
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));

    let report = std::thread::scope(|scope| {
        let reporter = {
            let progress = progress.clone();
            let spinner = spinner.clone();
            scope.spawn(move || {
                while !spinner.is_finished() {
                    spinner.set_message(format!(
                        "Ingesting... {} records ({} skipped)",
                        progress.processed.load(Ordering::Relaxed),
                        progress.skipped.load(Ordering::Relaxed),
                    ));
                    std::thread::sleep(Duration::from_millis(120));
                }
            })
        };
        let result = ingest::ingest_file(&mut storage, &source, &options);
        spinner.finish_and_clear();
        let _ = reporter.join();
        result
    })?;

    info!(
        loaded = report.records_loaded,
        skipped = report.records_skipped,
        resources_skipped = report.resources_skipped,
        "ingestion complete"
    );
    println!(
        "loaded {} entries ({} records skipped, {} resource lines skipped)",
        report.records_loaded, report.records_skipped, report.resources_skipped,
    );
    Ok(())
}

fn run_status(db_path: &Path) -> Result<()> {
    println!("database: {}", db_path.display());
    if !db_path.exists() {
        println!("status: not initialized (run `ccs init <source.xml>`)");
        return Ok(());
    }
    let storage = SqliteStorage::open(db_path)?;
    println!("schema version: {}", storage.schema_version()?);
    println!("entries: {}", storage.entry_count()?);
    println!("resource lines: {}", storage.resource_line_count()?);
    Ok(())
}

fn print_entry(entry: &CatalogEntry) {
    println!("{}  {}", entry.entry_code, entry.description);
    if !entry.detail_description.is_empty() {
        println!("  {}", entry.detail_description);
    }
    for (label, value) in [
        ("author", &entry.author),
        ("year", &entry.year),
        ("edition", &entry.edition),
    ] {
        if let Some(value) = value {
            println!("  {label}: {value}");
        }
    }
    println!(
        "  price: {} {}  (without surcharge: {}, labor ratio: {})",
        entry.unit_price,
        entry.unit_of_measure,
        entry.price_without_surcharge,
        entry.labor_ratio,
    );
    for level in entry.path.levels() {
        println!("  {}  {}", level.code, level.description);
    }
    if !entry.resources.is_empty() {
        println!("  resources:");
        for line in &entry.resources {
            println!(
                "    {}  {} x {} {} = {}",
                line.code, line.quantity, line.unit_price, line.unit_of_measure, line.amount,
            );
        }
    }
}

pub fn default_db_path() -> PathBuf {
    default_data_dir().join("catalog.db")
}

pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "cost-catalog-search", "ccs")
        .expect("project dirs available")
        .data_dir()
        .to_path_buf()
}
