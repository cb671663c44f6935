#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use patchdeck::config::SearchConfig;
use patchdeck::error::{Error, Result};
use patchdeck::index::{IndexItem, IndexProvider};
use patchdeck::install::ConfiguredDestinations;
use patchdeck::observer::InstallJournal;
use patchdeck::providers::registry::ProviderChain;
use patchdeck::providers::{MetadataProvider, MetadataRecord};
use patchdeck::resolver::RemoteResolver;
use patchdeck::session::{SearchSession, SessionEvents, SessionServices};
use patchdeck::thumbnails::ThumbnailProvider;

pub fn temp_root(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("patchdeck-{}-{}", tag, uuid::Uuid::new_v4()))
}

pub struct StaticIndex(pub Vec<IndexItem>);

#[async_trait]
impl IndexProvider for StaticIndex {
    async fn load_index(&self) -> Result<Vec<IndexItem>> {
        Ok(self.0.clone())
    }
}

/// Metadata provider answering from fixed tables, recording how it was used.
#[derive(Default)]
pub struct Scripted {
    source: &'static str,
    names: HashMap<String, String>,
    searches: HashMap<String, (Duration, Vec<MetadataRecord>)>,
    lookup_delay: Duration,
    active: AtomicUsize,
    pub peak: AtomicUsize,
    pub lookups: AtomicUsize,
}

impl Scripted {
    pub fn new(source: &'static str) -> Self {
        Self {
            source,
            ..Self::default()
        }
    }

    pub fn name(mut self, id: &str, name: &str) -> Self {
        self.names.insert(id.to_string(), name.to_string());
        self
    }

    pub fn search(mut self, text: &str, delay: Duration, records: Vec<MetadataRecord>) -> Self {
        self.searches.insert(text.to_string(), (delay, records));
        self
    }

    pub fn lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = delay;
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataProvider for Scripted {
    async fn lookup_by_id(&self, id: &str) -> Result<MetadataRecord> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.lookup_delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        self.names
            .get(id)
            .map(|name| MetadataRecord::new(id, name.as_str()))
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn search_by_text(&self, text: &str) -> Result<Vec<MetadataRecord>> {
        match self.searches.get(text) {
            Some((delay, records)) => {
                tokio::time::sleep(*delay).await;
                Ok(records.clone())
            }
            None => Ok(Vec::new()),
        }
    }

    fn source_name(&self) -> &'static str {
        self.source
    }
}

/// Thumbnail provider counting fetches per id.
#[derive(Default)]
pub struct CountingThumbnails {
    calls: Mutex<HashMap<String, usize>>,
    delay: Duration,
}

impl CountingThumbnails {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self, id: &str) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn max_calls_per_id(&self) -> usize {
        self.calls.lock().unwrap().values().copied().max().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl ThumbnailProvider for CountingThumbnails {
    async fn fetch(&self, id: &str) -> Result<Bytes> {
        *self.calls.lock().unwrap().entry(id.to_string()).or_insert(0) += 1;
        tokio::time::sleep(self.delay).await;
        Ok(Bytes::from(format!("jpeg:{}", id)))
    }
}

pub struct Harness {
    pub session: SearchSession,
    pub events: SessionEvents,
    pub journal: InstallJournal,
}

impl Harness {
    pub fn new(
        items: Vec<IndexItem>,
        chain: ProviderChain,
        thumbnails: Arc<CountingThumbnails>,
    ) -> Self {
        Self::with_destinations(items, chain, thumbnails, Vec::new())
    }

    pub fn with_destinations(
        items: Vec<IndexItem>,
        chain: ProviderChain,
        thumbnails: Arc<CountingThumbnails>,
        dirs: Vec<PathBuf>,
    ) -> Self {
        let journal = InstallJournal::new();
        let (session, events) = SearchSession::new(
            SessionServices {
                index: Arc::new(StaticIndex(items)),
                resolver: Arc::new(RemoteResolver::new(chain)),
                thumbnails,
                destinations: Arc::new(ConfiguredDestinations::new(dirs)),
                observer: Arc::new(journal.clone()),
            },
            SearchConfig::default(),
        );
        Self {
            session,
            events,
            journal,
        }
    }

    /// Load the index and settle the initial browse view.
    pub async fn ready(mut self) -> Self {
        self.session.refresh();
        self.settle().await;
        self
    }

    pub async fn settle(&mut self) {
        self.session.settle(&mut self.events).await;
    }

    pub fn ids(&self) -> Vec<String> {
        self.session.results().iter().map(|r| r.id.clone()).collect()
    }
}
