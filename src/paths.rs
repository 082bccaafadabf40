use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;

/// Determines the per-user app directories.
///
/// macOS:  ~/Library/Application Support/Vidgrab
/// Windows: %APPDATA%\\Vidgrab
/// Linux:  ~/.local/share/vidgrab (depending on XDG)
pub fn app_project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "vidgrab", "Vidgrab")
        .ok_or_else(|| anyhow!("failed to resolve per-user app data directory"))
}

/// Returns the directory where vidgrab stores its state (db, logs).
pub fn app_data_dir() -> Result<PathBuf> {
    Ok(app_project_dirs()?.data_dir().to_path_buf())
}

/// Returns the path to the SQLite database file.
pub fn db_path() -> Result<PathBuf> {
    Ok(app_data_dir()?.join("download_history.sqlite3"))
}

/// Returns the path to the JSON configuration document.
pub fn config_path() -> Result<PathBuf> {
    Ok(app_project_dirs()?.config_dir().join("config.json"))
}

/// Default destination for downloads when the config does not name one.
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .map(|d| d.join("vidgrab"))
        .unwrap_or_else(|| PathBuf::from("download"))
}

/// Create required directories for state storage: data dir and logs dir.
pub fn ensure_app_dirs() -> Result<AppDirs> {
    let data = app_data_dir()?;
    let logs = data.join("logs");

    fs::create_dir_all(&data).with_context(|| format!("create data dir: {}", data.display()))?;
    fs::create_dir_all(&logs).with_context(|| format!("create logs dir: {}", logs.display()))?;

    Ok(AppDirs { data, logs })
}

#[derive(Debug, Clone)]
pub struct AppDirs {
    pub data: PathBuf,
    pub logs: PathBuf,
}
