use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::providers::registry::ProviderChain;
use crate::providers::steam_store::SteamStoreProvider;
use crate::providers::steamspy::SteamSpyProvider;
use crate::providers::utils::normalize_id;
use crate::providers::MetadataRecord;

/// Id lookups try the primary and at most this many further providers.
const MAX_FALLBACK_HOPS: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteQuery {
    /// Query is a bare number; look the id up directly.
    ById(String),
    Text(String),
}

impl RemoteQuery {
    /// `None` for an empty query.
    pub fn classify(query: &str) -> Option<Self> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }
        Some(match query.parse::<u64>() {
            Ok(_) => RemoteQuery::ById(normalize_id(query)),
            Err(_) => RemoteQuery::Text(query.to_string()),
        })
    }
}

/// Runs queries against the provider chain.
pub struct RemoteResolver {
    chain: ProviderChain,
}

impl RemoteResolver {
    pub fn new(chain: ProviderChain) -> Self {
        Self { chain }
    }

    /// Store details/search as primary, SteamSpy as the id fallback.
    pub fn from_config(config: &Config) -> Result<Self> {
        let chain = ProviderChain::new()
            .with(Arc::new(SteamStoreProvider::new(config)?))
            .with(Arc::new(SteamSpyProvider::new(config)?));
        Ok(Self::new(chain))
    }

    /// Primary lookup, then one fallback hop. Returns the last error when
    /// every link fails. Errors that are not recoverable stop the chain.
    pub async fn lookup_by_id(&self, id: &str) -> Result<MetadataRecord> {
        let id = normalize_id(id);
        let mut last_err = Error::NotFound(id.clone());

        for provider in self.chain.all().iter().take(1 + MAX_FALLBACK_HOPS) {
            match provider.lookup_by_id(&id).await {
                Ok(record) if record.id == id => return Ok(record),
                Ok(record) => {
                    log::debug!(
                        "{} answered {} for {}, ignoring",
                        provider.source_name(),
                        record.id,
                        id
                    );
                    last_err = Error::NotFound(id.clone());
                }
                Err(e) if e.is_recoverable() => {
                    log::debug!("{} lookup of {} failed: {}", provider.source_name(), id, e);
                    last_err = e;
                }
                Err(e) => {
                    log::warn!("{} lookup of {} aborted: {}", provider.source_name(), id, e);
                    return Err(e);
                }
            }
        }

        Err(last_err)
    }

    /// Text search against the primary only; text has no fallback.
    pub async fn search_text(&self, text: &str) -> Result<Vec<MetadataRecord>> {
        match self.chain.primary() {
            Some(primary) => primary.search_by_text(text).await,
            None => Ok(Vec::new()),
        }
    }

    /// Remote records for a query. An id that no provider knows yields an
    /// empty list; an error is only returned when the providers could not be
    /// reached.
    pub async fn resolve(&self, query: &RemoteQuery) -> Result<Vec<MetadataRecord>> {
        match query {
            RemoteQuery::ById(id) => match self.lookup_by_id(id).await {
                Ok(record) => Ok(vec![record]),
                Err(e) if e.is_not_found() => Ok(Vec::new()),
                Err(e) => Err(e),
            },
            RemoteQuery::Text(text) => self.search_text(text).await,
        }
    }
}
