use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use crate::config::Config;
use crate::error::{Error, Result};

// ─── Index wire format ───

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IndexDocument {
    Games { games: Vec<IndexItem> },
    /// Legacy id-only index emitted by the old generator script.
    AppIds { app_ids: Vec<FlexibleId> },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FlexibleId {
    Text(String),
    Number(u64),
}

impl FlexibleId {
    fn into_string(self) -> String {
        match self {
            FlexibleId::Text(s) => s.trim().to_string(),
            FlexibleId::Number(n) => n.to_string(),
        }
    }
}

fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(FlexibleId::deserialize(deserializer)?.into_string())
}

fn default_supported() -> bool {
    true
}

/// A known item from the patch server's index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexItem {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_supported")]
    pub supported: bool,
    #[serde(default, alias = "hasFix")]
    pub has_fix: bool,
}

impl IndexItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>, has_fix: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            supported: true,
            has_fix,
        }
    }
}

/// True when `name` carries no real display name for `id`: empty, equal to
/// the id, or one of the sentinels the server and UI use while unresolved.
pub fn is_placeholder_name(name: &str, id: &str) -> bool {
    static SENTINEL: OnceLock<Regex> = OnceLock::new();
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed == id {
        return true;
    }
    let re = SENTINEL.get_or_init(|| {
        Regex::new(r"(?i)^(unknown( game)?( \d+)?|loading\.\.\.)$").expect("static regex")
    });
    re.is_match(trimmed)
}

/// Flags recomputed from the index for every merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexFlags {
    pub supported: bool,
    pub has_fix: bool,
}

/// Immutable snapshot of the index. Replaced wholesale on resync.
#[derive(Debug, Default)]
pub struct GameIndex {
    items: Vec<IndexItem>,
    by_id: HashMap<String, usize>,
}

impl GameIndex {
    pub fn new(items: Vec<IndexItem>) -> Self {
        let mut by_id = HashMap::with_capacity(items.len());
        let mut deduped: Vec<IndexItem> = Vec::with_capacity(items.len());
        for item in items {
            if item.id.is_empty() || by_id.contains_key(&item.id) {
                continue;
            }
            by_id.insert(item.id.clone(), deduped.len());
            deduped.push(item);
        }
        Self {
            items: deduped,
            by_id,
        }
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn items(&self) -> &[IndexItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&IndexItem> {
        self.by_id.get(id).map(|&i| &self.items[i])
    }

    /// Ids unknown to the index are neither supported nor fixable.
    pub fn flags(&self, id: &str) -> IndexFlags {
        match self.get(id) {
            Some(item) => IndexFlags {
                supported: item.supported,
                has_fix: item.has_fix,
            },
            None => IndexFlags::default(),
        }
    }
}

pub fn parse_index(body: &str) -> Result<Vec<IndexItem>> {
    let doc: IndexDocument = serde_json::from_str(body)?;
    Ok(match doc {
        IndexDocument::Games { games } => games,
        IndexDocument::AppIds { app_ids } => app_ids
            .into_iter()
            .map(|id| IndexItem::new(id.into_string(), String::new(), false))
            .collect(),
    })
}

/// Supplies the index; may fall back to a local cache when offline.
#[async_trait]
pub trait IndexProvider: Send + Sync {
    async fn load_index(&self) -> Result<Vec<IndexItem>>;
}

/// Fetches `games_index.json` from the patch server, keeping the last good
/// copy on disk for offline starts.
pub struct HttpIndexProvider {
    client: Client,
    url: String,
    cache_path: PathBuf,
}

impl HttpIndexProvider {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.network.user_agent.as_str())
            .timeout(config.network.index_timeout())
            .build()?;

        Ok(Self {
            client,
            url: config.index_url(),
            cache_path: config.index_cache_path(),
        })
    }

    async fn fetch_remote(&self) -> Result<String> {
        let resp = self.client.get(&self.url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::HttpStatus {
                status: resp.status().as_u16(),
                url: self.url.clone(),
            });
        }
        Ok(resp.text().await?)
    }

    async fn write_cache(&self, body: &str) {
        if let Some(parent) = self.cache_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                log::warn!("Could not create cache dir {}: {}", parent.display(), e);
                return;
            }
        }
        if let Err(e) = tokio::fs::write(&self.cache_path, body).await {
            log::warn!("Could not write index cache {}: {}", self.cache_path.display(), e);
        }
    }
}

#[async_trait]
impl IndexProvider for HttpIndexProvider {
    async fn load_index(&self) -> Result<Vec<IndexItem>> {
        match self.fetch_remote().await {
            Ok(body) => {
                let items = parse_index(&body)?;
                self.write_cache(&body).await;
                log::info!("Synced index: {} items", items.len());
                Ok(items)
            }
            Err(net_err) => {
                log::warn!("Index sync failed ({}), trying offline cache", net_err);
                match tokio::fs::read_to_string(&self.cache_path).await {
                    Ok(body) => {
                        let items = parse_index(&body)?;
                        log::info!("Offline mode: {} items from cache", items.len());
                        Ok(items)
                    }
                    Err(_) => Err(net_err),
                }
            }
        }
    }
}
