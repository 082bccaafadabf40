use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

/// Windows flag to prevent console window from appearing when spawning processes.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::{helpers, DownloadEvent, Outcome};
use crate::settings::AppConfig;
use crate::ytdlp::{HookProcessor, ToolPaths, YtDlpOptions};

pub type EventReceiver = mpsc::UnboundedReceiver<DownloadEvent>;
type EventSender = mpsc::UnboundedSender<DownloadEvent>;

/// One download of one URL. Consumed when started.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub url: String,
    pub dest: PathBuf,
    pub audio_only: bool,
    /// Snapshot taken when the task is created; later config edits do not apply.
    pub config: AppConfig,
    pub tools: ToolPaths,
}

/// Shared between a task and its handle so the terminal event goes out once.
#[derive(Debug, Clone, Default)]
struct OutcomeSlot(Arc<AtomicBool>);

impl OutcomeSlot {
    fn send(&self, tx: &EventSender, outcome: Outcome) {
        if !self.0.swap(true, Ordering::SeqCst) {
            let _ = tx.send(helpers::finished(outcome));
        }
    }
}

/// Handle to a spawned task.
#[derive(Debug)]
pub struct TaskHandle {
    url: String,
    cancel: CancellationToken,
    join: JoinHandle<()>,
    // weak so the receiver still sees the channel close when the task ends
    events: mpsc::WeakUnboundedSender<DownloadEvent>,
    outcome: OutcomeSlot,
}

impl TaskHandle {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Request cooperative cancellation. The task still emits its outcome.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the task to end on its own.
    pub async fn wait(self) {
        if let Err(e) = self.join.await {
            log::error!("download task for {} ended abnormally: {}", self.url, e);
        }
    }

    /// Cancel and wait up to `timeout`. Returns `true` if the task ended in time;
    /// otherwise the task is aborted and the canceled outcome is sent from here.
    pub async fn cancel_and_wait(self, timeout: Duration) -> bool {
        self.cancel.cancel();
        let abort = self.join.abort_handle();
        match tokio::time::timeout(timeout, self.join).await {
            Ok(_) => true,
            Err(_) => {
                log::warn!("download task for {} did not stop within {:?}", self.url, timeout);
                let tx = self.events.upgrade();
                abort.abort();
                if let Some(tx) = tx {
                    self.outcome.send(&tx, Outcome::canceled());
                }
                false
            }
        }
    }
}

impl DownloadTask {
    pub fn new(
        url: impl Into<String>,
        dest: impl Into<PathBuf>,
        audio_only: bool,
        config: AppConfig,
        tools: ToolPaths,
    ) -> Self {
        Self {
            url: url.into().trim().to_string(),
            dest: dest.into(),
            audio_only,
            config,
            tools,
        }
    }

    /// Spawn onto the current tokio runtime.
    pub fn spawn(self) -> (TaskHandle, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let outcome = OutcomeSlot::default();
        let handle_events = tx.downgrade();
        let url = self.url.clone();
        let join = tokio::spawn(self.run(tx, cancel.clone(), outcome.clone()));
        let handle = TaskHandle {
            url,
            cancel,
            join,
            events: handle_events,
            outcome,
        };
        (handle, rx)
    }

    /// Drive the download to completion, emitting events on `tx`.
    ///
    /// Always ends with exactly one `Finished` event; never returns an error.
    async fn run(self, tx: EventSender, cancel: CancellationToken, slot: OutcomeSlot) {
        let outcome = self.execute(&tx, &cancel).await;
        if outcome.success {
            log::info!("download of {} finished: {}", self.url, outcome.file_path);
        } else {
            log::warn!("download of {} failed: {}", self.url, outcome.message);
        }
        slot.send(&tx, outcome);
    }

    async fn execute(&self, tx: &EventSender, cancel: &CancellationToken) -> Outcome {
        let emit = |ev: DownloadEvent| {
            let _ = tx.send(ev);
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.dest).await {
            let msg = format!(
                "cannot create destination directory {}: {}",
                self.dest.display(),
                e
            );
            emit(helpers::log(msg.clone()));
            return Outcome::failure(msg);
        }

        let (opts, notes) = YtDlpOptions::from_config(
            &self.config,
            &self.dest,
            self.audio_only,
            self.tools.ffmpeg.as_deref(),
        );
        for note in notes {
            emit(helpers::log(note));
        }

        let args = opts.to_args(&self.url);
        log::info!("starting yt-dlp for {} with args: {:?}", self.url, args);

        let mut cmd = Command::new(&self.tools.yt_dlp);
        cmd.args(&self.tools.global_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Hide console window on Windows
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                let msg = format!(
                    "failed to start yt-dlp ({}): {}",
                    self.tools.yt_dlp.display(),
                    e
                );
                emit(helpers::log(msg.clone()));
                return Outcome::failure(msg);
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            stop_child(&mut child).await;
            return Outcome::failure("failed to capture yt-dlp output");
        };

        let mut stdout_reader = BufReader::new(stdout).lines();
        let mut stderr_reader = BufReader::new(stderr).lines();
        let mut stdout_done = false;
        let mut stderr_done = false;
        let mut hooks = HookProcessor::new();

        while !(stdout_done && stderr_done) {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::info!("download of {} received cancel signal", self.url);
                    stop_child(&mut child).await;
                    emit(helpers::log("download canceled by user"));
                    return Outcome::canceled();
                }
                line = stdout_reader.next_line(), if !stdout_done => match line {
                    Ok(Some(l)) => {
                        log::debug!("yt-dlp stdout: {}", l);
                        hooks.on_stdout(&l).into_iter().for_each(emit);
                    }
                    Ok(None) => stdout_done = true,
                    Err(e) => {
                        log::error!("error reading yt-dlp stdout: {}", e);
                        stdout_done = true;
                    }
                },
                line = stderr_reader.next_line(), if !stderr_done => match line {
                    Ok(Some(l)) => {
                        log::debug!("yt-dlp stderr: {}", l);
                        hooks.on_stderr(&l).into_iter().for_each(emit);
                    }
                    Ok(None) => stderr_done = true,
                    Err(e) => {
                        log::error!("error reading yt-dlp stderr: {}", e);
                        stderr_done = true;
                    }
                },
            }
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                stop_child(&mut child).await;
                return Outcome::canceled();
            }
            status = child.wait() => status,
        };

        match status {
            Ok(s) if s.success() => Outcome::success(hooks.final_path().unwrap_or_default()),
            Ok(s) => Outcome::failure(
                hooks
                    .error_message()
                    .unwrap_or_else(|| format!("yt-dlp exited with {s}")),
            ),
            Err(e) => Outcome::failure(format!("failed to wait for yt-dlp: {e}")),
        }
    }
}

async fn stop_child(child: &mut Child) {
    if let Err(e) = child.kill().await {
        log::debug!("kill yt-dlp: {}", e);
    }
}
