//! Session mediator
//!
//! Owns the store and at most one running download. The in-memory record
//! list is authoritative while the session lives: it is read (and the table
//! cleared) on load and written back in full on shutdown.

use std::path::PathBuf;
use std::time::Duration;

use crate::db::Db;
use crate::error::SessionError;
use crate::events::Outcome;
use crate::models::DownloadRecord;
use crate::settings::AppConfig;
use crate::task_runner::{DownloadTask, EventReceiver, TaskHandle};
use crate::url_utils::classify_platform;
use crate::ytdlp::ToolPaths;

pub struct Session {
    db: Db,
    /// Newest first.
    records: Vec<DownloadRecord>,
    active: Option<TaskHandle>,
}

impl Session {
    /// Take every stored record into memory and empty the table.
    pub fn load(mut db: Db) -> Result<Self, SessionError> {
        let records = db.list_all().map_err(|e| {
            log::error!("failed to read download history: {}", e);
            e
        })?;
        db.clear_all().map_err(|e| {
            log::error!("failed to clear download history after load: {}", e);
            e
        })?;

        log::info!("session loaded {} records", records.len());
        Ok(Self {
            db,
            records,
            active: None,
        })
    }

    pub fn records(&self) -> &[DownloadRecord] {
        &self.records
    }

    pub fn find(&self, url: &str) -> Option<&DownloadRecord> {
        let url = url.trim();
        self.records.iter().find(|r| r.url == url)
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    /// Queue a URL. Only Bilibili and YouTube video links are accepted, once each.
    pub fn add_url(&mut self, url: &str) -> Result<&DownloadRecord, SessionError> {
        let url = url.trim();
        let platform =
            classify_platform(url).ok_or_else(|| SessionError::UnsupportedUrl(url.to_string()))?;

        if self.find(url).is_some() {
            return Err(SessionError::Duplicate(url.to_string()));
        }

        log::info!("queued {} ({})", url, platform);
        self.records.insert(0, DownloadRecord::new(url, Some(platform)));
        Ok(&self.records[0])
    }

    /// Start downloading `url`, queuing it first if needed.
    ///
    /// Refused while another download is in flight; the slot is released by
    /// [`apply_outcome`](Self::apply_outcome).
    pub fn start(
        &mut self,
        url: &str,
        dest: impl Into<PathBuf>,
        audio_only: bool,
        config: &AppConfig,
        tools: &ToolPaths,
    ) -> Result<EventReceiver, SessionError> {
        if self.is_busy() {
            return Err(SessionError::Busy);
        }

        let url = url.trim();
        if self.find(url).is_none() {
            self.add_url(url)?;
        }

        let task = DownloadTask::new(url, dest, audio_only, config.clone(), tools.clone());
        let (handle, rx) = task.spawn();
        self.active = Some(handle);
        Ok(rx)
    }

    /// Record the terminal outcome of the active download and free the slot.
    pub fn apply_outcome(&mut self, outcome: &Outcome) -> Option<&DownloadRecord> {
        let handle = self.active.take()?;
        let record = self.records.iter_mut().find(|r| r.url == handle.url())?;

        if outcome.success {
            record.mark_finished(Some(&outcome.file_path));
        }
        Some(&*record)
    }

    /// Drop a record from the session. Returns whether it existed.
    pub fn remove(&mut self, url: &str) -> bool {
        let url = url.trim();
        let before = self.records.len();
        self.records.retain(|r| r.url != url);
        before != self.records.len()
    }

    /// Drop every record. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let n = self.records.len();
        self.records.clear();
        n
    }

    /// Stop any running download (waiting at most `timeout`) and write every
    /// record back to the store. Returns the number of rows written.
    pub async fn shutdown(mut self, timeout: Duration) -> Result<usize, SessionError> {
        if let Some(handle) = self.active.take() {
            log::info!("canceling in-flight download of {}", handle.url());
            handle.cancel_and_wait(timeout).await;
        }

        let mut saved = 0;
        let mut first_err = None;

        // oldest first, so ids keep creation order
        for record in self.records.iter().rev() {
            match self.db.insert_record(record) {
                Ok(Some(_)) => saved += 1,
                Ok(None) => log::warn!("skipped duplicate record on save: {}", record.url),
                Err(e) => {
                    log::error!("failed to save record {}: {}", record.url, e);
                    first_err.get_or_insert(e);
                }
            }
        }

        log::info!("session saved {} of {} records", saved, self.records.len());
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(saved),
        }
    }
}
