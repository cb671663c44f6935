use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

pub mod registry;
pub mod steam_store;
pub mod steamspy;
pub mod utils;

/// Name information for one item as reported by a remote provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataRecord {
    pub id: String,
    pub name: String,
}

impl MetadataRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A remote metadata source.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Look up one item. Providers without data answer `Error::NotFound`.
    async fn lookup_by_id(&self, id: &str) -> Result<MetadataRecord>;

    /// Free-text search. Providers that cannot search return no records.
    async fn search_by_text(&self, _text: &str) -> Result<Vec<MetadataRecord>> {
        Ok(Vec::new())
    }

    /// Internal source name (e.g. "steam_store")
    fn source_name(&self) -> &'static str;
}
