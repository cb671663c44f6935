use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use crate::config::Config;
use crate::downloader::{ArtifactKind, ArtifactProvider};
use crate::error::{Error, Result};
use crate::observer::{InstallJournal, JournalSnapshot, LogLevel, LogObserver};

/// Host-specific discovery of the directories an artifact is copied into.
pub trait DestinationEnumerator: Send + Sync {
    fn list_install_directories(&self) -> Vec<PathBuf>;
}

/// Destinations taken from `install.plugin_dirs`.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredDestinations {
    dirs: Vec<PathBuf>,
}

impl ConfiguredDestinations {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.install.plugin_dirs.clone())
    }
}

impl DestinationEnumerator for ConfiguredDestinations {
    fn list_install_directories(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        for dir in &self.dirs {
            if !dirs.contains(dir) {
                dirs.push(dir.clone());
            }
        }
        dirs
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum InstallState {
    Idle,
    Downloading,
    Installing,
    Done,
    Failed(String),
}

impl InstallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstallState::Done | InstallState::Failed(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DestinationOutcome {
    pub path: PathBuf,
    pub error: Option<String>,
}

impl DestinationOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub id: String,
    pub kind: ArtifactKind,
    pub state: InstallState,
    pub bytes: u64,
    pub destinations: Vec<DestinationOutcome>,
}

impl InstallReport {
    pub fn succeeded(&self) -> bool {
        self.state == InstallState::Done
    }
}

/// Downloads one artifact and copies it into every destination. The install
/// counts as done when at least one copy landed.
pub struct InstallFanout {
    artifacts: Arc<dyn ArtifactProvider>,
    destinations: Arc<dyn DestinationEnumerator>,
    temp_dir: PathBuf,
    default_destination: PathBuf,
}

impl InstallFanout {
    pub fn new(
        artifacts: Arc<dyn ArtifactProvider>,
        destinations: Arc<dyn DestinationEnumerator>,
        temp_dir: PathBuf,
        default_destination: PathBuf,
    ) -> Self {
        Self {
            artifacts,
            destinations,
            temp_dir,
            default_destination,
        }
    }

    pub fn from_config(
        config: &Config,
        artifacts: Arc<dyn ArtifactProvider>,
        destinations: Arc<dyn DestinationEnumerator>,
    ) -> Self {
        Self::new(
            artifacts,
            destinations,
            config.install.cache_dir.join("downloads"),
            config.install.default_plugin_dir.clone(),
        )
    }

    fn target_dirs(&self, observer: &dyn LogObserver) -> Vec<PathBuf> {
        let dirs = self.destinations.list_install_directories();
        if !dirs.is_empty() {
            return dirs;
        }
        observer.on_log(
            LogLevel::Warn,
            &format!(
                "No install directories found, using default {}",
                self.default_destination.display()
            ),
        );
        vec![self.default_destination.clone()]
    }

    /// Run the whole pipeline. Every transition is published on `state`, every
    /// step is reported to `observer`.
    pub async fn run(
        &self,
        id: &str,
        kind: ArtifactKind,
        observer: &dyn LogObserver,
        state: &watch::Sender<InstallState>,
    ) -> InstallReport {
        let mut report = InstallReport {
            id: id.to_string(),
            kind,
            state: InstallState::Downloading,
            bytes: 0,
            destinations: Vec::new(),
        };

        state.send_replace(InstallState::Downloading);
        observer.on_status("Downloading...");
        observer.on_log(LogLevel::Info, &format!("Fetching {} for {}", kind.label(), id));

        let temp = self
            .temp_dir
            .join(format!("{}-{}.part", id, Uuid::new_v4()));

        match self.artifacts.download(id, kind, &temp, observer).await {
            Ok(bytes) => report.bytes = bytes,
            Err(e) => {
                observer.on_log(LogLevel::Error, &format!("Download failed: {}", e));
                remove_temp(&temp).await;
                return finish(report, InstallState::Failed(e.to_string()), observer, state);
            }
        }

        state.send_replace(InstallState::Installing);
        observer.on_status("Installing...");

        let file_name = kind.file_name(id);
        let mut last_error: Option<Error> = None;

        for dir in self.target_dirs(observer) {
            let result = install_into(&temp, &dir, &file_name).await;
            match &result {
                Ok(target) => {
                    observer.on_log(LogLevel::Success, &format!("Installed to {}", target.display()));
                }
                Err(e) => {
                    observer.on_log(LogLevel::Error, &format!("{}: {}", dir.display(), e));
                }
            }
            report.destinations.push(DestinationOutcome {
                path: dir,
                error: result.as_ref().err().map(|e| e.to_string()),
            });
            if let Err(e) = result {
                last_error = Some(e);
            }
        }

        remove_temp(&temp).await;

        let installed = report.destinations.iter().filter(|d| d.succeeded()).count();
        let total = report.destinations.len();

        if installed > 0 {
            observer.on_log(
                LogLevel::Info,
                &format!("{} installed to {} of {} locations", id, installed, total),
            );
            finish(report, InstallState::Done, observer, state)
        } else {
            let error = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| Error::NoDestinations.to_string());
            finish(report, InstallState::Failed(error), observer, state)
        }
    }
}

fn finish(
    mut report: InstallReport,
    outcome: InstallState,
    observer: &dyn LogObserver,
    state: &watch::Sender<InstallState>,
) -> InstallReport {
    match &outcome {
        InstallState::Done => observer.on_status("Installed"),
        InstallState::Failed(e) => observer.on_status(&format!("Failed: {}", e)),
        _ => {}
    }
    report.state = outcome.clone();
    state.send_replace(outcome);
    report
}

async fn install_into(temp: &Path, dir: &Path, file_name: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).await.map_err(|e| Error::fs(dir, e))?;

    let target = dir.join(file_name);
    if fs::try_exists(&target).await.unwrap_or(false) {
        fs::remove_file(&target)
            .await
            .map_err(|e| Error::fs(&target, e))?;
    }

    fs::copy(temp, &target)
        .await
        .map_err(|e| Error::fs(&target, e))?;
    Ok(target)
}

async fn remove_temp(temp: &Path) {
    if let Err(e) = fs::remove_file(temp).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Could not remove {}: {}", temp.display(), e);
        }
    }
}

struct InstallJob {
    kind: ArtifactKind,
    journal: InstallJournal,
    state: watch::Receiver<InstallState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallStatus {
    pub id: String,
    pub kind: ArtifactKind,
    pub state: InstallState,
    pub journal: JournalSnapshot,
}

/// Runs installs on worker tasks, at most one per artifact at a time. A
/// patch and a fix for the same id are separate artifacts.
pub struct InstallManager {
    fanout: Arc<InstallFanout>,
    /// Keyed by the artifact's file name.
    jobs: Arc<RwLock<HashMap<String, InstallJob>>>,
}

impl InstallManager {
    pub fn new(fanout: Arc<InstallFanout>) -> Self {
        Self {
            fanout,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start installing the `kind` artifact of `id`. Fails with
    /// [`Error::AlreadyInstalling`] while the same artifact is still running.
    pub async fn start(&self, id: &str, kind: ArtifactKind) -> Result<InstallJournal> {
        let key = kind.file_name(id);
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get(&key) {
            if !job.state.borrow().is_terminal() {
                return Err(Error::AlreadyInstalling(key));
            }
        }

        let (tx, rx) = watch::channel(InstallState::Idle);
        let journal = InstallJournal::new();
        jobs.insert(
            key,
            InstallJob {
                kind,
                journal: journal.clone(),
                state: rx,
            },
        );
        drop(jobs);

        let fanout = self.fanout.clone();
        let id = id.to_string();
        let observer = journal.clone();
        tokio::spawn(async move {
            let report = fanout.run(&id, kind, &observer, &tx).await;
            log::info!("Install of {} finished: {:?}", id, report.state);
        });

        Ok(journal)
    }

    pub async fn status(&self, id: &str, kind: ArtifactKind) -> Option<InstallStatus> {
        let jobs = self.jobs.read().await;
        jobs.get(&kind.file_name(id)).map(|job| InstallStatus {
            id: id.to_string(),
            kind: job.kind,
            state: job.state.borrow().clone(),
            journal: job.journal.snapshot(),
        })
    }

    /// Wait for the install to reach `Done` or `Failed`.
    pub async fn wait(&self, id: &str, kind: ArtifactKind) -> Option<InstallState> {
        let mut rx = {
            let jobs = self.jobs.read().await;
            jobs.get(&kind.file_name(id))?.state.clone()
        };
        let done = rx.wait_for(InstallState::is_terminal).await.map(|s| s.clone());
        Some(match done {
            Ok(state) => state,
            Err(_) => rx.borrow().clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NullObserver;
    use async_trait::async_trait;
    use std::time::Duration;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("patchdeck-install-{}", Uuid::new_v4()))
    }

    struct StaticArtifact {
        body: &'static [u8],
        fail: bool,
        delay: Duration,
    }

    impl StaticArtifact {
        fn ok(body: &'static [u8]) -> Arc<Self> {
            Arc::new(Self {
                body,
                fail: false,
                delay: Duration::ZERO,
            })
        }
    }

    #[async_trait]
    impl ArtifactProvider for StaticArtifact {
        async fn download(
            &self,
            id: &str,
            _kind: ArtifactKind,
            dest: &Path,
            _observer: &dyn LogObserver,
        ) -> Result<u64> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(Error::HttpStatus {
                    status: 503,
                    url: format!("http://patches/{}", id),
                });
            }
            fs::create_dir_all(dest.parent().unwrap()).await.unwrap();
            fs::write(dest, self.body).await.unwrap();
            Ok(self.body.len() as u64)
        }
    }

    fn fanout(root: &Path, artifact: Arc<StaticArtifact>, dirs: Vec<PathBuf>) -> InstallFanout {
        InstallFanout::new(
            artifact,
            Arc::new(ConfiguredDestinations::new(dirs)),
            root.join("tmp"),
            root.join("default"),
        )
    }

    async fn leftover_temp_files(root: &Path) -> usize {
        let mut count = 0;
        if let Ok(mut entries) = fs::read_dir(root.join("tmp")).await {
            while let Ok(Some(_)) = entries.next_entry().await {
                count += 1;
            }
        }
        count
    }

    #[tokio::test]
    async fn test_replaces_existing_artifact() {
        let root = temp_root();
        let dest = root.join("a");
        fs::create_dir_all(&dest).await.unwrap();
        fs::write(dest.join("440.lua"), b"old").await.unwrap();

        let (tx, rx) = watch::channel(InstallState::Idle);
        let report = fanout(&root, StaticArtifact::ok(b"new"), vec![dest.clone()])
            .run("440", ArtifactKind::Patch, &NullObserver, &tx)
            .await;

        assert!(report.succeeded());
        assert_eq!(*rx.borrow(), InstallState::Done);
        assert_eq!(fs::read(dest.join("440.lua")).await.unwrap(), b"new");
        let _ = fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_all_destinations_fail() {
        let root = temp_root();
        fs::create_dir_all(&root).await.unwrap();
        let blocker = root.join("blocker");
        fs::write(&blocker, b"file").await.unwrap();

        let journal = InstallJournal::new();
        let (tx, _rx) = watch::channel(InstallState::Idle);
        let report = fanout(
            &root,
            StaticArtifact::ok(b"x"),
            vec![blocker.join("one"), blocker.join("two")],
        )
        .run("440", ArtifactKind::Patch, &journal, &tx)
        .await;

        match &report.state {
            InstallState::Failed(e) => assert!(e.contains("two")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(journal.count(LogLevel::Error), 2);
        assert_eq!(journal.count(LogLevel::Success), 0);
        assert_eq!(leftover_temp_files(&root).await, 0);
        let _ = fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_download_failure_is_terminal() {
        let root = temp_root();
        let artifact = Arc::new(StaticArtifact {
            body: b"",
            fail: true,
            delay: Duration::ZERO,
        });
        let (tx, _rx) = watch::channel(InstallState::Idle);
        let report = fanout(&root, artifact, vec![root.join("a")])
            .run("440", ArtifactKind::Fix, &NullObserver, &tx)
            .await;

        assert_eq!(
            report.state,
            InstallState::Failed("HTTP 503 from http://patches/440".to_string())
        );
        assert!(report.destinations.is_empty());
        let _ = fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_empty_enumeration_uses_default() {
        let root = temp_root();
        let journal = InstallJournal::new();
        let (tx, _rx) = watch::channel(InstallState::Idle);
        let report = fanout(&root, StaticArtifact::ok(b"x"), Vec::new())
            .run("10", ArtifactKind::Fix, &journal, &tx)
            .await;

        assert!(report.succeeded());
        assert!(root.join("default").join("10.zip").exists());
        assert_eq!(journal.count(LogLevel::Warn), 1);
        let _ = fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_manager_rejects_duplicate_install() {
        let root = temp_root();
        let artifact = Arc::new(StaticArtifact {
            body: b"x",
            fail: false,
            delay: Duration::from_millis(100),
        });
        let manager = InstallManager::new(Arc::new(fanout(&root, artifact, vec![root.join("a")])));

        manager.start("440", ArtifactKind::Patch).await.unwrap();
        let err = manager.start("440", ArtifactKind::Patch).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyInstalling(_)));

        assert_eq!(manager.wait("440", ArtifactKind::Patch).await, Some(InstallState::Done));
        let status = manager.status("440", ArtifactKind::Patch).await.unwrap();
        assert_eq!(status.state, InstallState::Done);
        assert!(!status.journal.entries.is_empty());

        // finished installs can be repeated
        manager.start("440", ArtifactKind::Patch).await.unwrap();
        assert_eq!(manager.wait("440", ArtifactKind::Patch).await, Some(InstallState::Done));
        assert!(manager.status("missing", ArtifactKind::Patch).await.is_none());
        let _ = fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_patch_and_fix_of_same_id_run_together() {
        let root = temp_root();
        let artifact = Arc::new(StaticArtifact {
            body: b"x",
            fail: false,
            delay: Duration::from_millis(100),
        });
        let dest = root.join("a");
        let manager = InstallManager::new(Arc::new(fanout(&root, artifact, vec![dest.clone()])));

        manager.start("440", ArtifactKind::Patch).await.unwrap();
        manager.start("440", ArtifactKind::Fix).await.unwrap();
        let err = manager.start("440", ArtifactKind::Fix).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyInstalling(ref key) if key == "440.zip"));

        assert_eq!(manager.wait("440", ArtifactKind::Patch).await, Some(InstallState::Done));
        assert_eq!(manager.wait("440", ArtifactKind::Fix).await, Some(InstallState::Done));
        let fix = manager.status("440", ArtifactKind::Fix).await.unwrap();
        assert_eq!(fix.kind, ArtifactKind::Fix);
        assert!(dest.join("440.lua").exists());
        assert!(dest.join("440.zip").exists());
        let _ = fs::remove_dir_all(&root).await;
    }
}
