use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::db::Db;
use crate::events::DownloadEvent;
use crate::logging::LogLevel;
use crate::models::{DownloadRecord, Platform};
use crate::session::Session;
use crate::settings::{AppConfig, ConfigStore};
use crate::url_utils::{classify_platform, extract_urls};
use crate::ytdlp::ToolPaths;

/// Upper bound on waiting for a canceled download to stop at exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    name = "vidgrab",
    version,
    about = "Download Bilibili and YouTube videos with yt-dlp",
    arg_required_else_help = true
)]
pub struct Cli {
    /// History database file (defaults to the per-user data directory)
    #[arg(long, value_name = "FILE", global = true)]
    pub db: Option<PathBuf>,

    /// Configuration file (defaults to the per-user config directory)
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Log verbosity for the log file
    #[arg(long, value_enum, default_value_t = LogLevel::Info, global = true)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download one or more URLs (pasted text is scanned for links)
    Get(GetArgs),
    /// Inspect and maintain the download history
    #[command(subcommand)]
    History(HistoryCommand),
    /// Show or change configuration values
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the platform a URL belongs to
    Classify { url: String },
}

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Video URLs, or text containing them
    #[arg(required = true)]
    pub input: Vec<String>,

    /// Extract audio only
    #[arg(short, long)]
    pub audio: bool,

    /// Destination directory (overrides download.default_path)
    #[arg(short, long, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Explicit yt-dlp executable
    #[arg(long, value_name = "PATH")]
    pub yt_dlp: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum HistoryCommand {
    /// List records, newest first
    List {
        #[arg(long, value_parser = parse_platform)]
        platform: Option<Platform>,
        #[arg(long, conflicts_with = "unfinished")]
        finished: bool,
        #[arg(long)]
        unfinished: bool,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Search title, URL and platform
    Search { keyword: String },
    /// Totals, per-platform counts and success rate
    Stats,
    /// Delete one record by id
    Delete { id: i64 },
    /// Delete every record
    Clear,
    /// Copy the database to a file
    Backup { path: PathBuf },
    /// Replace the database with a backup
    Restore { path: PathBuf },
    /// Compact the database and rebuild indexes
    Optimize,
    /// Open a finished download with the system viewer
    Open { id: i64 },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the whole configuration
    Show,
    /// Print the configuration file location
    Path,
    /// Print one value, e.g. `download.video_quality`
    Get { key: String },
    /// Set one value, e.g. `network.proxy socks5://127.0.0.1:1080`
    Set { key: String, value: String },
}

fn parse_platform(s: &str) -> Result<Platform, String> {
    Platform::from_tag(s).ok_or_else(|| format!("unknown platform {s:?} (bilibili, youtube)"))
}

/// Resolved file locations for one invocation.
pub struct Locations {
    pub db: PathBuf,
    pub config: PathBuf,
}

pub async fn run(cli: Cli, locations: Locations) -> Result<()> {
    match cli.command {
        Command::Get(args) => {
            let config = load_config(&locations.config)?;
            get(args, &config, &locations.db).await
        }
        Command::History(cmd) => history(cmd, &locations.db),
        Command::Config(cmd) => config_cmd(cmd, &locations.config),
        Command::Classify { url } => {
            match classify_platform(&url) {
                Some(p) => println!("{p}"),
                None => println!("unsupported"),
            }
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    let mut store = ConfigStore::new(path);
    let config = store
        .load()
        .with_context(|| format!("load config {}", path.display()))?;
    Ok(config.clone())
}

fn open_db(path: &Path) -> Result<Db> {
    Db::open(path).with_context(|| format!("open history database {}", path.display()))
}

async fn get(args: GetArgs, config: &AppConfig, db_path: &Path) -> Result<()> {
    let tools = ToolPaths::discover(args.yt_dlp.clone());
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    download_all(&args, config, db_path, &tools, interrupt).await
}

/// Download every URL in turn. When `interrupt` resolves the running
/// download is canceled and the history is still written back.
async fn download_all(
    args: &GetArgs,
    config: &AppConfig,
    db_path: &Path,
    tools: &ToolPaths,
    interrupt: impl Future<Output = ()>,
) -> Result<()> {
    let mut urls: Vec<String> = args.input.iter().flat_map(|s| extract_urls(s)).collect();
    if urls.is_empty() {
        urls = args.input.iter().map(|s| s.trim().to_string()).collect();
    }

    let dest = args
        .dir
        .clone()
        .unwrap_or_else(|| config.download.default_path.clone());
    let audio_only = args.audio || config.advanced.extract_audio;

    let mut session = Session::load(open_db(db_path)?)?;
    let mut failed = 0usize;
    let mut interrupted = false;
    tokio::pin!(interrupt);

    for url in &urls {
        let mut rx = match session.start(url, &dest, audio_only, config, tools) {
            Ok(rx) => rx,
            Err(e) => {
                eprintln!("{url}: {e}");
                failed += 1;
                continue;
            }
        };

        let mut outcome = None;
        loop {
            tokio::select! {
                ev = rx.recv() => match ev {
                    Some(ev) => {
                        print_event(&ev, args.json)?;
                        if let DownloadEvent::Finished(o) = ev {
                            outcome = Some(o);
                        }
                    }
                    None => break,
                },
                _ = &mut interrupt => {
                    interrupted = true;
                    break;
                }
            }
        }
        if interrupted {
            log::warn!("interrupted while downloading {}", url);
            eprintln!("interrupted, saving history");
            break;
        }

        match outcome {
            Some(o) => {
                if !o.success {
                    failed += 1;
                }
                session.apply_outcome(&o);
            }
            None => {
                failed += 1;
                log::error!("download task for {} ended without an outcome", url);
            }
        }
    }

    let saved = session.shutdown(SHUTDOWN_GRACE).await?;
    log::debug!("saved {} records", saved);

    if interrupted {
        bail!("interrupted");
    }
    if failed > 0 {
        bail!("{failed} of {} downloads failed", urls.len());
    }
    Ok(())
}

fn print_event(ev: &DownloadEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(ev)?);
        return Ok(());
    }
    match ev {
        DownloadEvent::Log { line } => println!("{line}"),
        DownloadEvent::Progress { .. } => {}
        DownloadEvent::Finished(o) if o.success => println!("done: {}", o.file_path),
        DownloadEvent::Finished(o) => eprintln!("failed: {}", o.message),
    }
    Ok(())
}

fn history(cmd: HistoryCommand, db_path: &Path) -> Result<()> {
    let mut db = open_db(db_path)?;

    match cmd {
        HistoryCommand::List {
            platform,
            finished,
            unfinished,
            json,
        } => {
            let mut records = match (finished, unfinished) {
                (true, _) => db.list_finished()?,
                (_, true) => db.list_unfinished()?,
                _ => match platform {
                    Some(p) => db.list_by_platform(p)?,
                    None => db.list_all()?,
                },
            };
            if let (Some(p), true) = (platform, finished || unfinished) {
                records.retain(|r| r.platform == Some(p));
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print_records(&records);
            }
        }
        HistoryCommand::Search { keyword } => print_records(&db.search(&keyword)?),
        HistoryCommand::Stats => {
            let stats = db.stats()?;
            println!("total:      {}", stats.total);
            println!("finished:   {}", stats.finished);
            println!("unfinished: {}", stats.unfinished);
            println!("success:    {:.1}%", stats.success_rate * 100.0);
            for (platform, count) in &stats.per_platform {
                println!("  {platform:<10} {count}");
            }
        }
        HistoryCommand::Delete { id } => {
            if !db.delete_download(id)? {
                bail!("no record with id {id}");
            }
            println!("deleted {id}");
        }
        HistoryCommand::Clear => println!("removed {} records", db.clear_all()?),
        HistoryCommand::Backup { path } => {
            db.backup_to(&path)?;
            println!("backed up to {}", path.display());
        }
        HistoryCommand::Restore { path } => {
            db.restore_from(&path)?;
            println!("restored from {}", path.display());
        }
        HistoryCommand::Optimize => {
            db.optimize()?;
            println!("optimized");
        }
        HistoryCommand::Open { id } => {
            let record = db
                .get_download(id)?
                .ok_or_else(|| anyhow!("no record with id {id}"))?;
            let path = record
                .file_path
                .filter(|_| record.finished)
                .ok_or_else(|| anyhow!("record {id} has no downloaded file"))?;
            open::that(&path).with_context(|| format!("open {path}"))?;
        }
    }
    Ok(())
}

fn print_records(records: &[DownloadRecord]) {
    if records.is_empty() {
        println!("no records");
        return;
    }
    for r in records {
        println!(
            "{:>5}  {:<10}  {:<8}  {}  {}",
            r.id.unwrap_or_default(),
            if r.finished { "finished" } else { "pending" },
            r.platform.map(Platform::as_str).unwrap_or("-"),
            r.created_at.format("%Y-%m-%d %H:%M"),
            r.title.as_deref().unwrap_or(&r.url),
        );
        if let Some(path) = &r.file_path {
            println!("       -> {path}");
        }
    }
}

fn config_cmd(cmd: ConfigCommand, path: &Path) -> Result<()> {
    let mut store = ConfigStore::new(path);

    match cmd {
        ConfigCommand::Path => println!("{}", store.path().display()),
        ConfigCommand::Show => {
            let config = store.load()?;
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        ConfigCommand::Get { key } => {
            store.load()?;
            let value = store.get_value(&key)?;
            match value.as_str() {
                Some(s) => println!("{s}"),
                None => println!("{value}"),
            }
        }
        ConfigCommand::Set { key, value } => {
            store.load()?;
            store.set_value(&key, &value)?;
            println!("{key} = {}", store.get_value(&key)?);
        }
    }
    Ok(())
}
