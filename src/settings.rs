//! Configuration document
//!
//! One JSON file with four sections. Missing keys fall back to defaults on
//! load; nested keys can be read and written by dotted path
//! (`download.video_quality`).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;
use crate::models::QualityTier;
use crate::paths;

/// Full application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub download: DownloadSettings,

    #[serde(default)]
    pub network: NetworkSettings,

    #[serde(default)]
    pub ui: UiSettings,

    #[serde(default)]
    pub advanced: AdvancedSettings,
}

/// What to fetch and where to put it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadSettings {
    /// Destination folder when none is given on the command line.
    #[serde(default = "paths::default_download_dir")]
    pub default_path: PathBuf,

    /// `best`, `worst`, or a max height such as `1080p`.
    #[serde(default, with = "video_quality")]
    pub video_quality: QualityTier,

    /// `best`, `worst`, or a max bitrate such as `192k`.
    #[serde(default, with = "audio_quality")]
    pub audio_quality: QualityTier,

    /// Merge container for video downloads (mp4/webm/mkv).
    #[serde(default = "default_format")]
    pub format: String,

    /// Codec for audio extraction (mp3/m4a/wav/aac).
    #[serde(default = "default_audio_format")]
    pub audio_format: String,

    #[serde(default)]
    pub subtitle: bool,

    #[serde(default = "default_true")]
    pub thumbnail: bool,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            default_path: paths::default_download_dir(),
            video_quality: QualityTier::Best,
            audio_quality: QualityTier::Best,
            format: default_format(),
            audio_format: default_audio_format(),
            subtitle: false,
            thumbnail: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Proxy URL, empty for a direct connection.
    #[serde(default)]
    pub proxy: String,

    /// Socket timeout in seconds; 0 leaves the tool default.
    #[serde(default = "default_timeout")]
    pub timeout: u32,

    /// Passed to the tool as `--retries`.
    #[serde(default = "default_retry_times")]
    pub retry_times: u32,

    #[serde(default = "default_concurrent_downloads")]
    pub concurrent_downloads: u32,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            proxy: String::new(),
            timeout: default_timeout(),
            retry_times: default_retry_times(),
            concurrent_downloads: default_concurrent_downloads(),
        }
    }
}

/// Presentation preferences. Stored for compatibility with the desktop front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiSettings {
    #[serde(default = "default_theme")]
    pub theme: String,

    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_true")]
    pub show_log: bool,

    #[serde(default = "default_true")]
    pub auto_clear_log: bool,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            language: default_language(),
            show_log: true,
            auto_clear_log: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvancedSettings {
    #[serde(default)]
    pub use_cookies: bool,

    /// Netscape-format cookies file; only used when `use_cookies` is set.
    #[serde(default)]
    pub cookies_file: String,

    #[serde(default)]
    pub user_agent: String,

    /// Treat every download as audio-only unless overridden.
    #[serde(default)]
    pub extract_audio: bool,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_format() -> String {
    "mp4".to_string()
}

fn default_audio_format() -> String {
    "mp3".to_string()
}

fn default_timeout() -> u32 {
    30
}

fn default_retry_times() -> u32 {
    3
}

fn default_concurrent_downloads() -> u32 {
    1
}

fn default_theme() -> String {
    "dark".to_string()
}

fn default_language() -> String {
    "zh_CN".to_string()
}

/// Serialize a quality tier as `best` / `worst` / `1080p`.
mod video_quality {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use crate::models::QualityTier;

    pub fn serialize<S: Serializer>(q: &QualityTier, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&q.video_label())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<QualityTier, D::Error> {
        String::deserialize(d)?.parse().map_err(D::Error::custom)
    }
}

/// Serialize a quality tier as `best` / `worst` / `192k`.
mod audio_quality {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use crate::models::QualityTier;

    pub fn serialize<S: Serializer>(q: &QualityTier, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&q.audio_label())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<QualityTier, D::Error> {
        String::deserialize(d)?.parse().map_err(D::Error::custom)
    }
}

/// Reads and writes the configuration document at a fixed path.
pub struct ConfigStore {
    path: PathBuf,
    config: AppConfig,
}

impl ConfigStore {
    /// Bind to `path` with defaults in memory; nothing is read until [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: AppConfig::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Read the document, writing a default one first if the file is absent.
    pub fn load(&mut self) -> Result<&AppConfig, ConfigError> {
        if !self.path.exists() {
            log::info!("config not found, writing defaults to {}", self.path.display());
            self.config = AppConfig::default();
            self.save()?;
            return Ok(&self.config);
        }

        let raw = fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.config = serde_json::from_str(&raw)?;
        log::debug!("loaded config from {}", self.path.display());
        Ok(&self.config)
    }

    /// Write the document as pretty JSON, creating parent directories.
    pub fn save(&self) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(&self.config)?;
        fs::write(&self.path, json).map_err(io_err)?;
        Ok(())
    }

    /// Read a nested value by dotted path, e.g. `network.proxy`.
    pub fn get_value(&self, key: &str) -> Result<Value, ConfigError> {
        let tree = serde_json::to_value(&self.config)?;
        tree.pointer(&json_pointer(key))
            .cloned()
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))
    }

    /// Set a nested value by dotted path and persist the document.
    ///
    /// `raw` is taken verbatim for string keys and parsed as JSON otherwise.
    /// A value that does not fit the key's type is rejected and nothing is written.
    pub fn set_value(&mut self, key: &str, raw: &str) -> Result<(), ConfigError> {
        let mut tree = serde_json::to_value(&self.config)?;
        let slot = tree
            .pointer_mut(&json_pointer(key))
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;

        if slot.is_object() {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                reason: "is a section, not a value".to_string(),
            });
        }

        *slot = if slot.is_string() {
            Value::String(raw.to_string())
        } else {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
        };

        let updated: AppConfig =
            serde_json::from_value(tree).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        self.config = updated;
        self.save()?;
        log::info!("config {} = {}", key, raw);
        Ok(())
    }
}

fn json_pointer(key: &str) -> String {
    key.split('.')
        .filter(|part| !part.is_empty())
        .fold(String::new(), |mut acc, part| {
            acc.push('/');
            acc.push_str(part);
            acc
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let config = AppConfig::default();
        assert_eq!(config.download.video_quality, QualityTier::Best);
        assert_eq!(config.download.format, "mp4");
        assert_eq!(config.download.audio_format, "mp3");
        assert!(!config.download.subtitle);
        assert!(config.download.thumbnail);
        assert_eq!(config.network.timeout, 30);
        assert_eq!(config.network.retry_times, 3);
        assert_eq!(config.network.concurrent_downloads, 1);
        assert_eq!(config.ui.theme, "dark");
        assert_eq!(config.ui.language, "zh_CN");
        assert!(!config.advanced.use_cookies);
    }

    #[test]
    fn test_quality_labels_in_json() {
        let mut config = AppConfig::default();
        config.download.video_quality = QualityTier::Exact(1080);
        config.download.audio_quality = QualityTier::Exact(192);

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["download"]["video_quality"], "1080p");
        assert_eq!(json["download"]["audio_quality"], "192k");

        let back: AppConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut store = ConfigStore::new(&path);
        let config = store.load().unwrap().clone();
        assert!(path.exists());
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_partial_file_backfills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "download": { "video_quality": "720p" }, "network": { "proxy": "socks5://127.0.0.1:1080" } }"#,
        )
        .unwrap();

        let mut store = ConfigStore::new(&path);
        let config = store.load().unwrap();
        assert_eq!(config.download.video_quality, QualityTier::Exact(720));
        assert_eq!(config.download.format, "mp4");
        assert_eq!(config.network.proxy, "socks5://127.0.0.1:1080");
        assert_eq!(config.network.retry_times, 3);
        assert_eq!(config.ui.theme, "dark");
    }

    #[test]
    fn test_dotted_get_and_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut store = ConfigStore::new(&path);
        store.load().unwrap();

        assert_eq!(store.get_value("network.timeout").unwrap(), 30);

        store.set_value("network.timeout", "60").unwrap();
        store.set_value("download.video_quality", "480p").unwrap();
        store.set_value("network.proxy", "http://127.0.0.1:8080").unwrap();
        store.set_value("advanced.use_cookies", "true").unwrap();

        // reload from disk
        let mut reloaded = ConfigStore::new(&path);
        let config = reloaded.load().unwrap();
        assert_eq!(config.network.timeout, 60);
        assert_eq!(config.download.video_quality, QualityTier::Exact(480));
        assert_eq!(config.network.proxy, "http://127.0.0.1:8080");
        assert!(config.advanced.use_cookies);
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConfigStore::new(dir.path().join("config.json"));
        store.load().unwrap();

        let err = store.set_value("network.timeout", "soon").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = store.set_value("download.video_quality", "hd").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = store.set_value("network.nope", "1").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey(_)));

        let err = store.set_value("network", "1").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        assert_eq!(store.config().network.timeout, 30);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let mut store = ConfigStore::new(&path);
        assert!(matches!(store.load().unwrap_err(), ConfigError::Json(_)));
    }
}
