use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use vidgrab::cli::{self, Cli, Locations};
use vidgrab::{logging, paths};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let log_dir = match paths::ensure_app_dirs() {
        Ok(dirs) => dirs.logs,
        Err(e) => {
            eprintln!("warning: {e:#}; logging to the temp directory");
            std::env::temp_dir().join("vidgrab")
        }
    };
    if let Some(path) = logging::init_logger(args.log_level, &log_dir) {
        log::debug!("logging to {}", path.display());
    }

    let locations = Locations {
        db: resolve(args.db.clone(), paths::db_path)?,
        config: resolve(args.config.clone(), paths::config_path)?,
    };
    log::info!(
        "vidgrab {} (db: {}, config: {})",
        env!("CARGO_PKG_VERSION"),
        locations.db.display(),
        locations.config.display()
    );

    let result = cli::run(args, locations).await;
    if let Err(e) = &result {
        log::error!("{:#}", e);
    }
    result
}

fn resolve(explicit: Option<PathBuf>, default: fn() -> Result<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(p) => Ok(p),
        None => default(),
    }
}
