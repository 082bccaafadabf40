use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use log::LevelFilter;

const LOG_FILE_NAME: &str = "vidgrab.log";

/// Log verbosity selectable on the command line.
#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Install the global logger: everything at `level` goes to `<log_dir>/vidgrab.log`,
/// warnings and errors are echoed to stderr.
///
/// Returns the log file path, or `None` when logging is off or the file could
/// not be opened (stderr output still works in the latter case).
pub fn init_logger(level: LogLevel, log_dir: &Path) -> Option<PathBuf> {
    if level == LogLevel::Off {
        return None;
    }

    let filter = LevelFilter::from(level);
    let log_path = log_dir.join(LOG_FILE_NAME);

    let file = match fs::create_dir_all(log_dir).and_then(|_| fern::log_file(&log_path)) {
        Ok(f) => Some(f),
        Err(e) => {
            eprintln!("warning: cannot open log file {}: {}", log_path.display(), e);
            None
        }
    };

    let stderr = fern::Dispatch::new()
        .level(filter.min(LevelFilter::Warn))
        .chain(std::io::stderr());

    let mut dispatch = fern::Dispatch::new()
        .level(filter)
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] [{:<5}] [{}] - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .chain(stderr);

    let opened = file.is_some();
    if let Some(f) = file {
        dispatch = dispatch.chain(f);
    }

    if let Err(e) = dispatch.apply() {
        eprintln!("warning: logger initialization failed: {}", e);
        return None;
    }

    opened.then_some(log_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_mapping() {
        assert_eq!(LevelFilter::from(LogLevel::Off), LevelFilter::Off);
        assert_eq!(LevelFilter::from(LogLevel::Debug), LevelFilter::Debug);
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }
}
