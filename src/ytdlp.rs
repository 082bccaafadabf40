use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::events::{helpers, DownloadEvent};
use crate::models::QualityTier;
use crate::settings::AppConfig;

/// Prefix of stdout lines carrying the download progress hook as JSON.
const PROGRESS_TAG: &str = "[hook] ";
/// Prefix of stdout lines carrying the postprocessor hook as JSON.
const POSTPROCESS_TAG: &str = "[pp] ";
/// Prefix of the stdout line printed once the file reaches its final location.
const FINAL_PATH_TAG: &str = "[final] ";

/// Bitrate handed to the audio extractor when the tier is best/worst.
const DEFAULT_AUDIO_KBPS: u32 = 192;

/// Where the external tools live.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    /// Path to the `yt-dlp` executable (or anything that speaks its CLI).
    pub yt_dlp: PathBuf,

    pub ffmpeg: Option<PathBuf>,

    /// Arguments placed before every generated option, e.g. a script path
    /// when `yt_dlp` points at an interpreter.
    pub global_args: Vec<String>,
}

impl ToolPaths {
    pub fn new(yt_dlp: impl Into<PathBuf>) -> Self {
        Self {
            yt_dlp: yt_dlp.into(),
            ffmpeg: None,
            global_args: vec![],
        }
    }

    /// Locate both tools, preferring an explicit yt-dlp path when given.
    pub fn discover(yt_dlp_override: Option<PathBuf>) -> Self {
        let yt_dlp = yt_dlp_override.unwrap_or_else(find_ytdlp_binary);
        Self {
            yt_dlp,
            ffmpeg: find_ffmpeg_binary(),
            global_args: vec![],
        }
    }

    pub fn with_global_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.global_args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Find yt-dlp: bundled sidecar first, then common install paths, then `PATH`.
pub fn find_ytdlp_binary() -> PathBuf {
    find_tool("yt-dlp").unwrap_or_else(|| {
        log::warn!("could not find yt-dlp in common paths, falling back to PATH lookup");
        PathBuf::from("yt-dlp")
    })
}

/// Find ffmpeg the same way; it is optional, so absence is not an error.
pub fn find_ffmpeg_binary() -> Option<PathBuf> {
    let found = find_tool("ffmpeg");
    if found.is_none() {
        log::warn!("could not find ffmpeg; merging and audio extraction may fail");
    }
    found
}

fn find_tool(name: &str) -> Option<PathBuf> {
    let file_name = if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    };

    // next to the executable, or in a macOS bundle's Resources dir
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
    {
        let mut candidates = vec![exe_dir.join(&file_name)];
        if let Some(parent) = exe_dir.parent() {
            candidates.push(parent.join("Resources").join(&file_name));
        }
        if let Some(p) = candidates.into_iter().find(|p| p.is_file()) {
            log::info!("found bundled {} at {}", name, p.display());
            return Some(p);
        }
    }

    let mut common: Vec<PathBuf> = ["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin", "/opt/local/bin"]
        .iter()
        .map(|dir| Path::new(dir).join(&file_name))
        .collect();
    if let Some(home) = dirs::home_dir() {
        common.push(home.join(".local").join("bin").join(&file_name));
    }
    if let Some(p) = common.into_iter().find(|p| p.is_file()) {
        log::info!("found {} at {}", name, p.display());
        return Some(p);
    }

    match which::which(name) {
        Ok(p) => {
            log::info!("found {} via PATH at {}", name, p.display());
            Some(p)
        }
        Err(_) => None,
    }
}

/// Audio extraction postprocessor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractAudio {
    pub codec: String,
    pub quality_kbps: u32,
}

/// Declarative yt-dlp option set for one download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YtDlpOptions {
    pub format: String,
    pub output_template: String,
    pub merge_output_format: Option<String>,
    pub extract_audio: Option<ExtractAudio>,
    pub no_playlist: bool,
    pub proxy: Option<String>,
    pub socket_timeout: Option<u32>,
    pub retries: u32,
    pub cookies_file: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub write_subtitles: bool,
    pub write_thumbnail: bool,
    pub ffmpeg_location: Option<PathBuf>,
}

impl YtDlpOptions {
    /// Translate a configuration snapshot into an option set.
    ///
    /// Returns the options plus human-readable notes about settings that were
    /// skipped (e.g. a cookies file that does not exist).
    pub fn from_config(
        config: &AppConfig,
        dest: &Path,
        audio_only: bool,
        ffmpeg: Option<&Path>,
    ) -> (Self, Vec<String>) {
        let mut notes = Vec::new();
        let download = &config.download;
        let network = &config.network;
        let advanced = &config.advanced;

        let (format, merge_output_format, extract_audio) = if audio_only {
            let quality_kbps = match download.audio_quality {
                QualityTier::Exact(k) => k,
                QualityTier::Best | QualityTier::Worst => DEFAULT_AUDIO_KBPS,
            };
            (
                audio_format_selector(download.audio_quality),
                None,
                Some(ExtractAudio {
                    codec: download.audio_format.clone(),
                    quality_kbps,
                }),
            )
        } else {
            (
                video_format_selector(download.video_quality),
                Some(download.format.clone()),
                None,
            )
        };

        let cookies_file = if advanced.use_cookies {
            let path = PathBuf::from(advanced.cookies_file.trim());
            if !advanced.cookies_file.trim().is_empty() && path.is_file() {
                Some(path)
            } else {
                let note = format!(
                    "cookies file not found, continuing without cookies: {}",
                    path.display()
                );
                log::warn!("{}", note);
                notes.push(note);
                None
            }
        } else {
            None
        };

        let opts = Self {
            format,
            output_template: dest.join("%(title)s.%(ext)s").to_string_lossy().into_owned(),
            merge_output_format,
            extract_audio,
            no_playlist: true,
            proxy: non_blank(&network.proxy),
            socket_timeout: (network.timeout > 0).then_some(network.timeout),
            retries: network.retry_times,
            cookies_file,
            user_agent: non_blank(&advanced.user_agent),
            write_subtitles: download.subtitle,
            write_thumbnail: download.thumbnail,
            ffmpeg_location: ffmpeg.map(Path::to_path_buf),
        };

        (opts, notes)
    }

    /// Render the full argument list, hook templates included, ending with `url`.
    pub fn to_args(&self, url: &str) -> Vec<String> {
        let mut args: Vec<String> = [
            "--newline",
            "--no-warnings",
            "--no-simulate",
            "--progress",
            "--progress-template",
            "download:[hook] %(progress)j",
            "--progress-template",
            "postprocess:[pp] %(progress)j",
            "--print",
            "after_move:[final] %(filepath)s",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let mut push = |flag: &str, value: String| {
            args.push(flag.to_string());
            args.push(value);
        };

        push("-f", self.format.clone());
        push("-o", self.output_template.clone());

        if let Some(fmt) = &self.merge_output_format {
            push("--merge-output-format", fmt.clone());
        }
        if let Some(pp) = &self.extract_audio {
            args.push("-x".to_string());
            args.push("--audio-format".to_string());
            args.push(pp.codec.clone());
            args.push("--audio-quality".to_string());
            args.push(format!("{}K", pp.quality_kbps));
        }
        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }
        if let Some(t) = self.socket_timeout {
            args.push("--socket-timeout".to_string());
            args.push(t.to_string());
        }
        args.push("--retries".to_string());
        args.push(self.retries.to_string());
        if let Some(cookies) = &self.cookies_file {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().into_owned());
        }
        if let Some(ua) = &self.user_agent {
            args.push("--add-headers".to_string());
            args.push(format!("User-Agent:{ua}"));
        }
        if self.write_subtitles {
            args.push("--write-subs".to_string());
            args.push("--write-auto-subs".to_string());
        }
        if self.write_thumbnail {
            args.push("--write-thumbnail".to_string());
        }
        if let Some(ffmpeg) = &self.ffmpeg_location {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.to_string_lossy().into_owned());
        }
        if self.no_playlist {
            args.push("--no-playlist".to_string());
        }

        args.push(url.to_string());
        args
    }
}

fn non_blank(s: &str) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

pub fn video_format_selector(q: QualityTier) -> String {
    match q {
        QualityTier::Best => "bestvideo+bestaudio/best".to_string(),
        QualityTier::Worst => "worstvideo+worstaudio/worst".to_string(),
        QualityTier::Exact(h) => format!("bestvideo[height<={h}]+bestaudio/best[height<={h}]"),
    }
}

pub fn audio_format_selector(q: QualityTier) -> String {
    match q {
        QualityTier::Best => "bestaudio/best".to_string(),
        QualityTier::Worst => "worstaudio/worst".to_string(),
        QualityTier::Exact(k) => format!("bestaudio[abr<={k}]/best"),
    }
}

/// Remove ANSI escape sequences (colors, cursor movement) from tool output.
pub fn strip_ansi(s: &str) -> String {
    static ANSI_RE: OnceLock<Option<Regex>> = OnceLock::new();
    match ANSI_RE
        .get_or_init(|| Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").ok())
        .as_ref()
    {
        Some(re) => re.replace_all(s, "").into_owned(),
        None => s.to_string(),
    }
}

/// The download progress dictionary yt-dlp hands to progress hooks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressInfo {
    #[serde(default)]
    pub status: String,
    pub filename: Option<String>,
    pub downloaded_bytes: Option<f64>,
    pub total_bytes: Option<f64>,
    pub total_bytes_estimate: Option<f64>,
    #[serde(rename = "_percent_str")]
    pub percent_str: Option<String>,
    #[serde(rename = "_speed_str")]
    pub speed_str: Option<String>,
    #[serde(rename = "_eta_str")]
    pub eta_str: Option<String>,
}

impl ProgressInfo {
    /// Percent in `0..=100`.
    ///
    /// Byte counts win over the preformatted string. A `finished` status is 100
    /// regardless of what else was reported.
    pub fn percent(&self) -> Option<f64> {
        if self.status == "finished" {
            return Some(100.0);
        }

        let total = self
            .total_bytes
            .filter(|t| *t > 0.0)
            .or(self.total_bytes_estimate.filter(|t| *t > 0.0));
        let from_bytes = match (self.downloaded_bytes, total) {
            (Some(done), Some(total)) => Some(done / total * 100.0),
            _ => None,
        };

        from_bytes
            .or_else(|| self.percent_str.as_deref().and_then(parse_percent))
            .map(|p| p.clamp(0.0, 100.0))
    }
}

/// Parse `"50.0%"`, `" 7.3%"` or a bare fraction like `"0.5"`.
pub fn parse_percent(raw: &str) -> Option<f64> {
    let cleaned = strip_ansi(raw);
    let t = cleaned.trim();
    if let Some(num) = t.strip_suffix('%') {
        return num.trim().parse::<f64>().ok();
    }
    let v = t.parse::<f64>().ok()?;
    // "0.42" and "1.0" are fractions, a bare "1" is one percent.
    let fraction = v < 1.0 || (v == 1.0 && t.contains('.'));
    Some(if fraction { v * 100.0 } else { v })
}

/// The postprocessor hook dictionary.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostProcessInfo {
    #[serde(default)]
    pub status: String,
    pub postprocessor: Option<String>,
}

/// One classified stdout line.
#[derive(Debug, Clone)]
pub enum HookLine {
    Progress(ProgressInfo),
    PostProcess(PostProcessInfo),
    FinalPath(String),
    Plain(String),
}

/// Classify a raw stdout line. Hook lines whose JSON does not parse are
/// treated as plain output.
pub fn parse_line(raw: &str) -> HookLine {
    let line = strip_ansi(raw);
    let trimmed = line.trim();

    if let Some(json) = trimmed.strip_prefix(PROGRESS_TAG) {
        if let Ok(info) = serde_json::from_str::<ProgressInfo>(json) {
            return HookLine::Progress(info);
        }
    } else if let Some(json) = trimmed.strip_prefix(POSTPROCESS_TAG) {
        if let Ok(info) = serde_json::from_str::<PostProcessInfo>(json) {
            return HookLine::PostProcess(info);
        }
    } else if let Some(path) = trimmed.strip_prefix(FINAL_PATH_TAG) {
        return HookLine::FinalPath(path.trim().to_string());
    }

    HookLine::Plain(trimmed.to_string())
}

/// Turns the tool's output lines into runner events and remembers what the
/// outcome needs (final path, error text).
#[derive(Debug, Default)]
pub struct HookProcessor {
    last_filename: Option<String>,
    final_path: Option<String>,
    error_lines: Vec<String>,
}

impl HookProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_stdout(&mut self, raw: &str) -> Vec<DownloadEvent> {
        self.on_line(raw)
    }

    /// With `--print` in effect yt-dlp runs quietly and the progress
    /// templates land on stderr, so both streams share one classifier.
    pub fn on_stderr(&mut self, raw: &str) -> Vec<DownloadEvent> {
        self.on_line(raw)
    }

    fn on_line(&mut self, raw: &str) -> Vec<DownloadEvent> {
        match parse_line(raw) {
            HookLine::Progress(info) => self.on_progress(info),
            HookLine::PostProcess(info) => {
                let name = info.postprocessor.as_deref().unwrap_or("postprocessor");
                vec![helpers::log(format!("[postprocess] {} {}", name, info.status))]
            }
            HookLine::FinalPath(path) => {
                let line = format!("final file: {path}");
                self.final_path = Some(path);
                vec![helpers::log(line)]
            }
            HookLine::Plain(line) if line.is_empty() => vec![],
            HookLine::Plain(line) => {
                self.note_error(&line);
                vec![helpers::log(line)]
            }
        }
    }

    fn on_progress(&mut self, info: ProgressInfo) -> Vec<DownloadEvent> {
        if let Some(name) = info.filename.as_deref().filter(|f| !f.is_empty()) {
            self.last_filename = Some(name.to_string());
        }

        let line = match info.status.as_str() {
            "downloading" => format!(
                "[downloading] {} | speed: {} | eta: {}",
                clean_field(info.percent_str.as_deref()),
                clean_field(info.speed_str.as_deref()),
                clean_field(info.eta_str.as_deref()),
            ),
            "finished" => format!(
                "file saved as {}",
                info.filename.as_deref().unwrap_or("(unknown)")
            ),
            other => format!("[download] {other}"),
        };

        let mut events = vec![helpers::log(line)];
        if let Some(p) = info.percent() {
            events.push(helpers::progress(p.round() as u8));
        }
        events
    }

    fn note_error(&mut self, line: &str) {
        if line.starts_with("ERROR:") {
            self.error_lines.push(line.to_string());
        }
    }

    /// Postprocessed path if the tool reported one, else the last downloaded file.
    pub fn final_path(&self) -> Option<&str> {
        self.final_path
            .as_deref()
            .or(self.last_filename.as_deref())
    }

    /// The tool's own error text, if it printed any.
    pub fn error_message(&self) -> Option<String> {
        (!self.error_lines.is_empty()).then(|| self.error_lines.join("\n"))
    }
}

fn clean_field(s: Option<&str>) -> String {
    s.map(|v| strip_ansi(v).trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "N/A".to_string())
}
