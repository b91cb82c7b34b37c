//! quire: command-line access to a synced note store.

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use quire::config::{DEBOUNCE_VAR, FTS_VAR, ROOT_VAR, STATE_DIR_VAR, STORE_VAR};
use quire::{Config, Quire, describe};
use sync_core::version::display_version;
use sync_core::{Notice, Origin, SyncStatus};

#[derive(Parser, Debug)]
#[command(name = "quire")]
#[command(about = "Offline-first note sync with full-text and backlink search")]
struct Args {
    /// Store backend: dir or memory
    #[arg(long, global = true, env = STORE_VAR)]
    store: Option<String>,

    /// Note directory (supports ~)
    #[arg(short, long, global = true, env = ROOT_VAR)]
    root: Option<String>,

    /// Directory for the WAL and the index snapshot
    #[arg(long, global = true, env = STATE_DIR_VAR)]
    state_dir: Option<String>,

    /// Quiet period before edits are written, in milliseconds
    #[arg(long, global = true, env = DEBOUNCE_VAR)]
    debounce_ms: Option<String>,

    /// Maintain the full-text index (true/false)
    #[arg(long, global = true, env = FTS_VAR)]
    fts: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every document in the store
    List,
    /// Rebuild the index against the store listing
    Reindex,
    /// Documents containing all of the given terms
    Search {
        #[arg(required = true)]
        terms: Vec<String>,
    },
    /// Documents that link to a path
    Backlinks { path: String },
    /// Print a document (and the remote version while in conflict)
    Show { path: String },
    /// Change a document and wait for the write
    Edit {
        path: String,
        /// Replace the whole document
        #[arg(long, conflicts_with = "append")]
        set: Option<String>,
        /// Append to the end of the document
        #[arg(long)]
        append: Option<String>,
    },
    /// Keep the local text of a conflicting document and write it
    Resolve { path: String },
    /// Show documents with edits that have not been written yet
    Status,
    /// Write every pending edit
    Sync,
}

impl Args {
    fn setting(&self, key: &str) -> Option<String> {
        match key {
            STORE_VAR => self.store.clone(),
            ROOT_VAR => self.root.clone(),
            STATE_DIR_VAR => self.state_dir.clone(),
            DEBOUNCE_VAR => self.debounce_ms.clone(),
            FTS_VAR => self.fts.clone(),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,quire=debug,sync_core=debug,search_index=debug"
    } else {
        "warn,quire=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let config = Config::from_lookup(|key| args.setting(key))?;
    info!("Store: {:?} at {:?}", config.store, config.root);

    let quire = Quire::open(&config).await?;
    let _notices = quire.on_notice(|notice| match notice {
        Notice::Conflict { path } => warn!("{} changed remotely; run `quire resolve {}` to keep your text", path, path),
        Notice::SaveFailed { path, message } => error!("Failed to save {}: {}", path, message),
    });

    match args.command {
        Command::List => {
            quire.refresh().await?;
            let paths = quire.listing().paths();
            print_lines(args.json, &paths)?;
        }
        Command::Reindex => {
            quire.refresh().await?;
            match quire.last_reindex() {
                Some(report) if args.json => println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "upserted": report.upserted,
                        "deleted": report.deleted,
                        "unchanged": report.unchanged,
                        "failedFetches": report.failed_fetches,
                        "failedSaves": report.failed_saves,
                    }))?
                ),
                Some(report) => println!(
                    "{} indexed, {} removed, {} unchanged, {} failed",
                    report.upserted,
                    report.deleted,
                    report.unchanged,
                    report.failed_fetches + report.failed_saves
                ),
                None => bail!("Full-text search is disabled"),
            }
        }
        Command::Search { terms } => {
            quire.refresh().await?;
            let hits = quire.search(&terms.join(" ")).await?;
            print_lines(args.json, &hits)?;
        }
        Command::Backlinks { path } => {
            quire.refresh().await?;
            let hits = quire.backlinks(&path).await?;
            print_lines(args.json, &hits)?;
        }
        Command::Show { path } => {
            let session = quire.open_file(&path).await?;
            if args.json {
                let value = json!({
                    "path": session.path(),
                    "text": session.text(),
                    "overlay": session.overlay(),
                    "status": describe(&session.status()),
                    "baseVersion": session.base_version(),
                    "remoteVersion": session.remote_version(),
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                print!("{}", session.text());
                if let Some(overlay) = session.overlay() {
                    eprintln!(
                        "\n--- conflict: remote version {} ---",
                        display_version(&session.remote_version())
                    );
                    eprint!("{}", overlay);
                }
            }
        }
        Command::Edit { path, set, append } => {
            let session = quire.open_file(&path).await?;
            match (set, append) {
                (Some(text), None) => session.buffer().replace_all(text, Origin::Local),
                (None, Some(text)) => session.buffer().append(text, Origin::Local),
                _ => bail!("Pass exactly one of --set or --append"),
            }
            let status = session.wait_settled().await;
            report_status(args.json, &path, &status)?;
        }
        Command::Resolve { path } => {
            let session = quire.open_file(&path).await?;
            session.resolve_conflict()?;
            let status = session.wait_settled().await;
            report_status(args.json, &path, &status)?;
        }
        Command::Status => {
            let pending = quire.pending();
            if args.json {
                println!("{}", serde_json::to_string_pretty(&json!({ "pending": pending }))?);
            } else if pending.is_empty() {
                println!("Everything is synced");
            } else {
                println!("{} document(s) with unsaved edits:", pending.len());
                for path in pending {
                    println!("  {}", path);
                }
            }
        }
        Command::Sync => {
            let report = quire.sync_pending().await;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for entry in report {
                    println!("{}: {}", entry.path, entry.status);
                }
            }
        }
    }

    quire.flush_index().await;
    Ok(())
}

fn print_lines(json: bool, lines: &[String]) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(lines)?);
    } else {
        for line in lines {
            println!("{}", line);
        }
    }
    Ok(())
}

fn report_status(json: bool, path: &str, status: &SyncStatus) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "path": path, "status": describe(status) }))?
        );
    } else {
        println!("{}: {}", path, describe(status));
    }
    Ok(())
}
