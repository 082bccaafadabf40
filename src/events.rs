use serde::Serialize;

/// Message used for the terminal outcome of a cooperatively canceled task.
pub const CANCELED_MESSAGE: &str = "download canceled";

/// Terminal result of one download task. Emitted exactly once, last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
    /// Final file after postprocessing; empty on failure.
    pub file_path: String,
}

impl Outcome {
    pub fn success(file_path: impl Into<String>) -> Self {
        Self {
            success: true,
            message: "download complete".to_string(),
            file_path: file_path.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            file_path: String::new(),
        }
    }

    pub fn canceled() -> Self {
        Self::failure(CANCELED_MESSAGE)
    }

    pub fn is_canceled(&self) -> bool {
        !self.success && self.message == CANCELED_MESSAGE
    }
}

/// Runner -> listener events, in the order the tool reported them.
///
/// Serialized as `{"event": "...", "data": ...}` for the `--json` output mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum DownloadEvent {
    /// One human-readable line, ANSI escapes already stripped.
    Log { line: String },
    /// Integer percent in `0..=100`.
    Progress { percent: u8 },
    Finished(Outcome),
}

impl DownloadEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadEvent::Finished(_))
    }
}

pub mod helpers {
    use super::*;

    pub fn log(line: impl Into<String>) -> DownloadEvent {
        DownloadEvent::Log { line: line.into() }
    }

    pub fn progress(percent: u8) -> DownloadEvent {
        DownloadEvent::Progress {
            percent: percent.min(100),
        }
    }

    pub fn finished(outcome: Outcome) -> DownloadEvent {
        DownloadEvent::Finished(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::helpers::*;
    use super::*;

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(progress(42)).unwrap();
        assert_eq!(json["event"], "progress");
        assert_eq!(json["data"]["percent"], 42);

        let json = serde_json::to_value(finished(Outcome::failure("boom"))).unwrap();
        assert_eq!(json["event"], "finished");
        assert_eq!(json["data"]["success"], false);
        assert_eq!(json["data"]["file_path"], "");
    }

    #[test]
    fn progress_is_capped() {
        assert_eq!(progress(250), DownloadEvent::Progress { percent: 100 });
    }

    #[test]
    fn canceled_outcome_is_recognized() {
        assert!(Outcome::canceled().is_canceled());
        assert!(!Outcome::failure("ERROR: nope").is_canceled());
        assert!(!Outcome::success("/tmp/a.mp4").is_canceled());
    }
}
