use serde::Serialize;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Success,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Success => "SUCCESS",
        }
    }
}

/// One user-visible progress line.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
        }
    }
}

/// Receiver for user-facing progress. Delivery is best effort; nothing here
/// may fail the operation that reports.
pub trait LogObserver: Send + Sync {
    fn on_log(&self, level: LogLevel, message: &str);

    fn on_status(&self, _message: &str) {}

    fn on_progress(&self, _done: u64, _total: u64) {}
}

/// Drops everything.
pub struct NullObserver;

impl LogObserver for NullObserver {
    fn on_log(&self, _level: LogLevel, _message: &str) {}
}

/// Mirrors observer traffic into the `log` facade.
pub struct LogForwarder;

impl LogObserver for LogForwarder {
    fn on_log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info | LogLevel::Success => log::info!("[{}] {}", level.as_str(), message),
            LogLevel::Warn => log::warn!("{}", message),
            LogLevel::Error => log::error!("{}", message),
        }
    }

    fn on_status(&self, message: &str) {
        log::debug!("status: {}", message);
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JournalSnapshot {
    pub entries: Vec<LogEntry>,
    pub status: Option<String>,
    pub bytes_done: u64,
    pub bytes_total: u64,
}

/// In-memory record of everything reported for one operation. Clones share
/// the same journal.
#[derive(Debug, Clone, Default)]
pub struct InstallJournal {
    inner: Arc<Mutex<JournalSnapshot>>,
}

impl InstallJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> JournalSnapshot {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.snapshot().entries
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.entries().iter().filter(|e| e.level == level).count()
    }

    fn with<F: FnOnce(&mut JournalSnapshot)>(&self, f: F) {
        match self.inner.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl LogObserver for InstallJournal {
    fn on_log(&self, level: LogLevel, message: &str) {
        LogForwarder.on_log(level, message);
        self.with(|j| j.entries.push(LogEntry::new(level, message)));
    }

    fn on_status(&self, message: &str) {
        self.with(|j| j.status = Some(message.to_string()));
    }

    fn on_progress(&self, done: u64, total: u64) {
        self.with(|j| {
            j.bytes_done = done;
            j.bytes_total = total;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_records_shared_across_clones() {
        let journal = InstallJournal::new();
        let observer: Arc<dyn LogObserver> = Arc::new(journal.clone());

        observer.on_log(LogLevel::Info, "Connecting to server...");
        observer.on_log(LogLevel::Success, "Copy successful");
        observer.on_status("Downloading patch...");
        observer.on_progress(512, 1024);

        let snap = journal.snapshot();
        assert_eq!(snap.entries.len(), 2);
        assert_eq!(journal.count(LogLevel::Success), 1);
        assert_eq!(snap.status.as_deref(), Some("Downloading patch..."));
        assert_eq!((snap.bytes_done, snap.bytes_total), (512, 1024));
    }

    #[test]
    fn test_level_serializes_uppercase() {
        let json = serde_json::to_string(&LogLevel::Success).unwrap();
        assert_eq!(json, "\"SUCCESS\"");
    }
}
