pub mod cli;
pub mod db;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod paths;
pub mod session;
pub mod settings;
pub mod task_runner;
pub mod url_utils;
pub mod ytdlp;

pub use db::Db;
pub use error::{ConfigError, SessionError, StoreError};
pub use events::{DownloadEvent, Outcome};
pub use models::{DownloadRecord, DownloadStats, Platform, QualityTier};
pub use session::Session;
pub use settings::{AppConfig, ConfigStore};
pub use task_runner::{DownloadTask, TaskHandle};
pub use ytdlp::ToolPaths;
