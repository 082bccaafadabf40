use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse origin site of a URL, derived purely from its shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Bilibili,
    Youtube,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Bilibili => "bilibili",
            Platform::Youtube => "youtube",
        }
    }

    /// Parse a stored platform tag. Older stores wrote mixed case ("YouTube").
    pub fn from_tag(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bilibili" => Some(Platform::Bilibili),
            "youtube" => Some(Platform::Youtube),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One URL the user has queued, attempted, or completed downloading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// Assigned by the store; `None` until the record has been persisted.
    pub id: Option<i64>,
    pub url: String,
    pub title: Option<String>,
    /// Resolved output file, set only once a download succeeds.
    pub file_path: Option<String>,
    pub platform: Option<Platform>,
    pub finished: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DownloadRecord {
    /// A fresh, unpersisted record for a submitted URL.
    pub fn new(url: impl Into<String>, platform: Option<Platform>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            url: url.into(),
            title: None,
            file_path: None,
            platform,
            finished: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a successful outcome in place.
    pub fn mark_finished(&mut self, file_path: Option<&str>) {
        self.finished = true;
        if let Some(p) = file_path.filter(|p| !p.is_empty()) {
            self.file_path = Some(p.to_string());
        }
        self.touch();
    }

    fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now < self.created_at {
            self.created_at
        } else {
            now
        };
    }
}

/// Aggregate counts over the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DownloadStats {
    pub total: u64,
    pub finished: u64,
    pub unfinished: u64,
    /// Keyed by stored platform tag; rows with no platform are not counted here.
    pub per_platform: BTreeMap<String, u64>,
    /// `finished / total`, in `[0, 1]`; zero for an empty store.
    pub success_rate: f64,
}

impl DownloadStats {
    pub fn new(total: u64, finished: u64, per_platform: BTreeMap<String, u64>) -> Self {
        let success_rate = if total == 0 {
            0.0
        } else {
            finished as f64 / total as f64
        };
        Self {
            total,
            finished,
            unfinished: total.saturating_sub(finished),
            per_platform,
            success_rate,
        }
    }
}

/// Quality selector shared by the video (`1080p`) and audio (`192k`) settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QualityTier {
    #[default]
    Best,
    Worst,
    /// Pixel height for video, kbit/s for audio.
    Exact(u32),
}

impl QualityTier {
    /// Render as a video setting, e.g. `720p`.
    pub fn video_label(self) -> String {
        match self {
            QualityTier::Best => "best".to_string(),
            QualityTier::Worst => "worst".to_string(),
            QualityTier::Exact(h) => format!("{h}p"),
        }
    }

    /// Render as an audio setting, e.g. `192k`.
    pub fn audio_label(self) -> String {
        match self {
            QualityTier::Best => "best".to_string(),
            QualityTier::Worst => "worst".to_string(),
            QualityTier::Exact(k) => format!("{k}k"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseQualityError(pub String);

impl fmt::Display for ParseQualityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid quality {:?} (expected best, worst, or a number like 1080p / 192k)",
            self.0
        )
    }
}

impl std::error::Error for ParseQualityError {}

impl FromStr for QualityTier {
    type Err = ParseQualityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim().to_ascii_lowercase();
        match t.as_str() {
            "best" => return Ok(QualityTier::Best),
            "worst" => return Ok(QualityTier::Worst),
            _ => {}
        }
        let digits = t.trim_end_matches(['p', 'k']);
        digits
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .map(QualityTier::Exact)
            .ok_or_else(|| ParseQualityError(s.to_string()))
    }
}
