use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::session::SessionEvent;

/// Image source addressed by item id.
#[async_trait]
pub trait ThumbnailProvider: Send + Sync {
    async fn fetch(&self, id: &str) -> Result<Bytes>;
}

pub struct HttpThumbnailProvider {
    client: Client,
    url_template: String,
}

impl HttpThumbnailProvider {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .user_agent(config.network.user_agent.as_str())
                .timeout(config.network.thumbnail_timeout())
                .build()?,
            url_template: config.providers.thumbnail_url_template.clone(),
        })
    }

    pub fn url_for(&self, id: &str) -> String {
        self.url_template.replace("{id}", &urlencoding::encode(id))
    }
}

#[async_trait]
impl ThumbnailProvider for HttpThumbnailProvider {
    async fn fetch(&self, id: &str) -> Result<Bytes> {
        let url = self.url_for(id);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::HttpStatus {
                status: resp.status().as_u16(),
                url,
            });
        }
        let body = resp.bytes().await?;
        if body.is_empty() {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(body)
    }
}

/// Process-wide image cache keyed by item id. Not tied to any query: an
/// image fetched for one search is reused by the next.
pub struct ThumbnailCache {
    provider: Arc<dyn ThumbnailProvider>,
    images: HashMap<String, Bytes>,
    in_flight: HashSet<String>,
}

impl ThumbnailCache {
    pub fn new(provider: Arc<dyn ThumbnailProvider>) -> Self {
        Self {
            provider,
            images: HashMap::new(),
            in_flight: HashSet::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Bytes> {
        self.images.get(id)
    }

    /// Dispatch fetches for the given visible ids that are neither cached
    /// nor already being fetched. Each fetch reports back through `tx` as a
    /// [`SessionEvent::Thumbnail`]. Returns how many fetches were started.
    pub fn request<'a>(
        &mut self,
        ids: impl IntoIterator<Item = &'a str>,
        tx: &UnboundedSender<SessionEvent>,
    ) -> usize {
        let mut started = 0;

        for id in ids {
            if id.is_empty() || self.images.contains_key(id) || !self.in_flight.insert(id.to_string())
            {
                continue;
            }

            let provider = self.provider.clone();
            let tx = tx.clone();
            let id = id.to_string();
            tokio::spawn(async move {
                let result = provider.fetch(&id).await;
                let _ = tx.send(SessionEvent::Thumbnail { id, result });
            });
            started += 1;
        }

        started
    }

    /// Record a finished fetch. The id leaves the in-flight set whether or not
    /// the fetch succeeded.
    pub fn complete(&mut self, id: &str, result: Result<Bytes>) -> bool {
        self.in_flight.remove(id);
        match result {
            Ok(image) => {
                self.images.insert(id.to_string(), image);
                true
            }
            Err(e) => {
                log::debug!("Thumbnail for {} failed: {}", id, e);
                false
            }
        }
    }
}
