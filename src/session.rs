use bytes::Bytes;
use serde::Serialize;
use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::config::SearchConfig;
use crate::error::{Error, Result};
use crate::generation::{GenerationToken, QueryGeneration};
use crate::index::{GameIndex, IndexItem, IndexProvider};
use crate::install::DestinationEnumerator;
use crate::library;
use crate::matcher::{LocalMatcher, SearchMode};
use crate::merger::{ResultRecord, ResultSet};
use crate::names::NameResolutionQueue;
use crate::observer::LogObserver;
use crate::providers::MetadataRecord;
use crate::resolver::{RemoteQuery, RemoteResolver};
use crate::thumbnails::{ThumbnailCache, ThumbnailProvider};

/// Completion of asynchronous work, delivered back to the session that
/// dispatched it.
#[derive(Debug)]
pub enum SessionEvent {
    /// Remote query finished. `None` when it was aborted by a newer query.
    Remote {
        token: GenerationToken,
        outcome: Option<Result<Vec<MetadataRecord>>>,
    },
    NameResolved {
        token: GenerationToken,
        id: String,
        name: Option<String>,
    },
    /// Sent once by every name queue run, last.
    NamesFinished { token: GenerationToken, run: u64 },
    Thumbnail { id: String, result: Result<Bytes> },
    /// Index load started by the `epoch`-th refresh.
    IndexLoaded {
        epoch: u64,
        result: Result<Vec<IndexItem>>,
    },
    LibraryScanned {
        token: GenerationToken,
        ids: Vec<String>,
    },
}

/// Receiving end of a session's event channel.
pub struct SessionEvents {
    rx: UnboundedReceiver<SessionEvent>,
}

impl SessionEvents {
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }
}

/// External collaborators a session talks to.
pub struct SessionServices {
    pub index: Arc<dyn IndexProvider>,
    pub resolver: Arc<RemoteResolver>,
    pub thumbnails: Arc<dyn ThumbnailProvider>,
    pub destinations: Arc<dyn DestinationEnumerator>,
    pub observer: Arc<dyn LogObserver>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub generation: u64,
    pub query: String,
    pub mode: SearchMode,
    pub status: String,
    pub resolving_names: bool,
    pub index_size: usize,
    pub results: Vec<ResultRecord>,
}

/// All search state of one user. Owns the result list and the thumbnail
/// cache; every mutation happens through `&mut self`, workers only report
/// back through the event channel.
pub struct SearchSession {
    services: SessionServices,
    settings: SearchConfig,
    matcher: LocalMatcher,
    generation: QueryGeneration,
    index: Arc<GameIndex>,
    results: ResultSet,
    query: String,
    mode: SearchMode,
    installed: Vec<String>,
    status: String,
    failure: Option<String>,
    remote_pending: bool,
    index_pending: bool,
    index_epoch: u64,
    library_pending: bool,
    names: NameResolutionQueue,
    name_attempts: HashSet<String>,
    names_total: u64,
    names_done: u64,
    thumbnails: ThumbnailCache,
    viewport: Range<usize>,
    outstanding: usize,
    tx: UnboundedSender<SessionEvent>,
}

impl SearchSession {
    pub fn new(services: SessionServices, settings: SearchConfig) -> (Self, SessionEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let thumbnails = ThumbnailCache::new(services.thumbnails.clone());

        let session = Self {
            matcher: LocalMatcher::new(settings.local_result_cap),
            names: NameResolutionQueue::new(settings.name_concurrency),
            viewport: 0..settings.browse_count,
            services,
            settings,
            generation: QueryGeneration::new(),
            index: GameIndex::empty(),
            results: ResultSet::new(),
            query: String::new(),
            mode: SearchMode::default(),
            installed: Vec::new(),
            status: String::new(),
            failure: None,
            remote_pending: false,
            index_pending: false,
            index_epoch: 0,
            library_pending: false,
            name_attempts: HashSet::new(),
            names_total: 0,
            names_done: 0,
            thumbnails,
            outstanding: 0,
            tx,
        };

        (session, SessionEvents { rx })
    }

    pub fn results(&self) -> &[ResultRecord] {
        self.results.records()
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    pub fn generation(&self) -> &GenerationToken {
        self.generation.current()
    }

    pub fn index(&self) -> &Arc<GameIndex> {
        &self.index
    }

    pub fn is_resolving_names(&self) -> bool {
        self.names.is_running()
    }

    /// Number of dispatched units of work that have not reported back.
    pub fn pending(&self) -> usize {
        self.outstanding
    }

    pub fn thumbnail(&self, id: &str) -> Option<Bytes> {
        self.thumbnails.get(id).cloned()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            generation: self.generation.current().value(),
            query: self.query.clone(),
            mode: self.mode,
            status: self.status.clone(),
            resolving_names: self.names.is_running(),
            index_size: self.index.len(),
            results: self.results.records().to_vec(),
        }
    }

    /// Replace the index without re-running the query.
    pub fn set_index(&mut self, index: Arc<GameIndex>) {
        self.index = index;
    }

    /// Run `query` in the current mode. Local matches are visible as soon as
    /// this returns, except in library mode where they follow the directory
    /// scan. Remote records and names arrive as events.
    pub fn submit_query(&mut self, query: &str) -> GenerationToken {
        let token = self.generation.new_generation();
        self.names.cancel();
        self.name_attempts.clear();
        self.names_total = 0;
        self.names_done = 0;
        self.failure = None;
        self.remote_pending = false;
        self.library_pending = false;
        self.query = query.trim().to_string();

        if self.mode == SearchMode::Library {
            // local results wait for the scan of the install directories
            self.results.clear();
            self.dispatch_library_scan(&token);
            self.update_status();
            return token;
        }

        self.run_local(&token);

        if self.mode.uses_remote() {
            if let Some(remote) = RemoteQuery::classify(&self.query) {
                self.dispatch_remote(remote, &token);
            }
        }

        self.start_name_resolution();
        self.refresh_thumbnails();
        self.update_status();
        token
    }

    /// Switch mode and re-run the current query under a new generation.
    pub fn set_mode(&mut self, mode: SearchMode) -> GenerationToken {
        self.mode = mode;
        let query = self.query.clone();
        self.submit_query(&query)
    }

    /// Reload the index. The current query is re-run once it arrives. Only
    /// the load started by the latest refresh is applied.
    pub fn refresh(&mut self) -> GenerationToken {
        let token = self.generation.new_generation();
        self.names.cancel();
        self.results.clear();
        self.failure = None;
        self.index_pending = true;
        self.index_epoch += 1;
        self.outstanding += 1;

        let epoch = self.index_epoch;
        let provider = self.services.index.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = provider.load_index().await;
            let _ = tx.send(SessionEvent::IndexLoaded { epoch, result });
        });

        self.update_status();
        token
    }

    /// Visible rows changed; fetch thumbnails for what is now on screen.
    pub fn set_viewport(&mut self, visible: Range<usize>) {
        self.viewport = visible;
        self.refresh_thumbnails();
    }

    /// Apply one completion. Returns whether the visible state changed.
    pub fn apply(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Remote { token, outcome } => {
                self.complete_one();
                if !self.generation.is_current(&token) {
                    log::debug!("{} (gen {})", Error::StaleGeneration, token.value());
                    return false;
                }
                self.remote_pending = false;
                let changed = match outcome {
                    Some(Ok(records)) => self.merge_remote(records),
                    Some(Err(e)) => {
                        log::warn!("Remote search for '{}' failed: {}", self.query, e);
                        if self.results.is_empty() {
                            self.failure = Some(format!("Search failed: {}", e));
                        }
                        false
                    }
                    None => false,
                };
                self.update_status();
                changed
            }
            SessionEvent::NameResolved { token, id, name } => {
                if !self.generation.is_current(&token) {
                    log::debug!("{} (gen {}, name of {})", Error::StaleGeneration, token.value(), id);
                    return false;
                }
                self.names.mark_done(&id);
                self.names_done = (self.names_done + 1).min(self.names_total);
                self.services
                    .observer
                    .on_progress(self.names_done, self.names_total);

                match name {
                    Some(name) => self
                        .results
                        .merge(&[MetadataRecord::new(id, name)], &self.index),
                    None => false,
                }
            }
            SessionEvent::NamesFinished { token, run } => {
                self.complete_one();
                if self.names.finish(run) && self.generation.is_current(&token) {
                    self.update_status();
                    return true;
                }
                false
            }
            SessionEvent::Thumbnail { id, result } => {
                self.complete_one();
                self.thumbnails.complete(&id, result)
            }
            SessionEvent::IndexLoaded { epoch, result } => {
                self.complete_one();
                if epoch != self.index_epoch {
                    log::debug!(
                        "Dropping index load {} (latest is {})",
                        epoch,
                        self.index_epoch
                    );
                    return false;
                }
                self.index_pending = false;
                match result {
                    Ok(items) => {
                        self.index = Arc::new(GameIndex::new(items));
                        log::info!("Game index ready: {} items", self.index.len());
                    }
                    Err(e) => {
                        log::error!("Failed to load game index: {}", e);
                        if self.index.is_empty() {
                            self.failure = Some(format!("Failed to load game index: {}", e));
                        }
                    }
                }
                let query = self.query.clone();
                let failure = self.failure.take();
                self.submit_query(&query);
                if self.results.is_empty() && failure.is_some() {
                    self.failure = failure;
                    self.update_status();
                }
                true
            }
            SessionEvent::LibraryScanned { token, ids } => {
                self.complete_one();
                if !self.generation.is_current(&token) {
                    log::debug!(
                        "{} (gen {}, library scan)",
                        Error::StaleGeneration,
                        token.value()
                    );
                    return false;
                }
                self.library_pending = false;
                self.installed = ids;
                self.run_local(&token);
                self.start_name_resolution();
                self.refresh_thumbnails();
                self.update_status();
                true
            }
        }
    }

    /// Apply events until everything dispatched so far has reported back.
    pub async fn settle(&mut self, events: &mut SessionEvents) {
        while self.outstanding > 0 {
            match events.recv().await {
                Some(event) => {
                    self.apply(event);
                }
                None => break,
            }
        }
    }

    fn complete_one(&mut self) {
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    fn dispatch_remote(&mut self, query: RemoteQuery, token: &GenerationToken) {
        self.outstanding += 1;
        self.remote_pending = true;

        let resolver = self.services.resolver.clone();
        let tx = self.tx.clone();
        let token = token.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = token.superseded() => None,
                result = resolver.resolve(&query) => Some(result),
            };
            let _ = tx.send(SessionEvent::Remote { token, outcome });
        });
    }

    fn run_local(&mut self, token: &GenerationToken) {
        let local = if self.query.is_empty() {
            self.matcher.browse(
                &self.index,
                self.mode,
                &self.installed,
                self.settings.browse_count,
            )
        } else {
            self.matcher
                .search(&self.query, &self.index, self.mode, &self.installed)
        };
        self.results = ResultSet::from_records(local);
        log::debug!(
            "Query '{}' ({:?}) gen {}: {} local results",
            self.query,
            self.mode,
            token.value(),
            self.results.len()
        );
    }

    fn dispatch_library_scan(&mut self, token: &GenerationToken) {
        self.outstanding += 1;
        self.library_pending = true;

        let dirs = self.services.destinations.list_install_directories();
        let tx = self.tx.clone();
        let token = token.clone();
        tokio::spawn(async move {
            let ids = library::installed_ids(&dirs).await;
            let _ = tx.send(SessionEvent::LibraryScanned { token, ids });
        });
    }

    fn merge_remote(&mut self, records: Vec<MetadataRecord>) -> bool {
        let records: Vec<MetadataRecord> = match self.mode {
            SearchMode::FixOnly => records
                .into_iter()
                .filter(|r| self.index.flags(&r.id).has_fix)
                .collect(),
            _ => records,
        };

        let changed = self.results.merge(&records, &self.index);
        if changed {
            self.start_name_resolution();
            self.refresh_thumbnails();
        }
        changed
    }

    /// Queue every placeholder not yet attempted in this generation. A queue
    /// already running is restarted with its unfinished ids plus the new ones.
    fn start_name_resolution(&mut self) {
        let fresh: Vec<String> = self
            .results
            .placeholder_ids()
            .into_iter()
            .filter(|id| !self.name_attempts.contains(id))
            .collect();
        if fresh.is_empty() {
            return;
        }

        let mut ids = if self.names.is_running() {
            self.names.remaining()
        } else {
            self.names_total = 0;
            self.names_done = 0;
            Vec::new()
        };
        self.names_total += fresh.len() as u64;
        self.name_attempts.extend(fresh.iter().cloned());
        ids.extend(fresh);

        self.outstanding += 1;
        let token = self.generation.current().clone();
        let run = self
            .names
            .start(ids, &token, self.services.resolver.clone(), &self.tx);
        log::debug!("Name queue {} started ({} pending)", run, self.names_total);
    }

    fn refresh_thumbnails(&mut self) {
        let records = self.results.records();
        let end = self.viewport.end.min(records.len());
        let start = self.viewport.start.min(end);
        let visible: Vec<String> = records[start..end].iter().map(|r| r.id.clone()).collect();

        self.outstanding += self
            .thumbnails
            .request(visible.iter().map(String::as_str), &self.tx);
    }

    fn compute_status(&self) -> String {
        if self.results.is_empty() {
            if self.remote_pending || self.index_pending || self.library_pending {
                return "Searching...".to_string();
            }
            if let Some(failure) = &self.failure {
                return failure.clone();
            }
            let message = match (self.mode, self.query.is_empty()) {
                (SearchMode::Library, true) => "No installed games found",
                (SearchMode::FixOnly, true) => "No fixes available",
                (SearchMode::Patcher, true) => "Game index is empty",
                _ => "No results found",
            };
            return message.to_string();
        }

        let n = self.results.len();
        let noun = if n == 1 { "result" } else { "results" };
        if self.names.is_running() {
            format!("Found {} {} • Fetching game names...", n, noun)
        } else {
            format!("Found {} {}", n, noun)
        }
    }

    fn update_status(&mut self) {
        let status = self.compute_status();
        if status != self.status {
            self.services.observer.on_status(&status);
            self.status = status;
        }
    }
}
