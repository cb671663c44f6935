use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use super::utils::{self, id_from_value};
use super::{MetadataProvider, MetadataRecord};
use crate::config::Config;
use crate::error::{Error, Result};

/// Primary provider: store details and store search endpoints.
pub struct SteamStoreProvider {
    client: Client,
    details_url: String,
    search_url: String,
}

impl SteamStoreProvider {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .user_agent(config.network.user_agent.as_str())
                .timeout(config.network.metadata_timeout())
                .build()?,
            details_url: config.providers.store_details_url.clone(),
            search_url: config.providers.store_search_url.clone(),
        })
    }
}

/// `{"<id>": {"success": true, "data": {"steam_appid": .., "name": ..}}}`
pub fn parse_app_details(body: &Value, id: &str) -> Option<MetadataRecord> {
    let root = body.get(id)?;
    if !root.get("success").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    let data = root.get("data")?;
    let name = data.get("name").and_then(Value::as_str)?.trim();
    if name.is_empty() {
        return None;
    }
    // A record answering for a different id is not an answer for this one.
    if let Some(returned) = data.get("steam_appid").and_then(id_from_value) {
        if returned != id {
            return None;
        }
    }
    Some(MetadataRecord::new(id, name))
}

/// `{"items": [{"id": 440, "name": ".."}, ..]}`
pub fn parse_store_search(body: &Value) -> Vec<MetadataRecord> {
    body.get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let id = item.get("id").and_then(id_from_value)?;
                    let name = item.get("name").and_then(Value::as_str).unwrap_or("");
                    Some(MetadataRecord::new(id, name.trim()))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl MetadataProvider for SteamStoreProvider {
    async fn lookup_by_id(&self, id: &str) -> Result<MetadataRecord> {
        let body = utils::get_json(
            &self.client,
            &self.details_url,
            &[("appids", id), ("filters", "basic")],
        )
        .await?;

        parse_app_details(&body, id).ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn search_by_text(&self, text: &str) -> Result<Vec<MetadataRecord>> {
        let body = utils::get_json(
            &self.client,
            &self.search_url,
            &[("term", text), ("l", "english"), ("cc", "US")],
        )
        .await?;

        Ok(parse_store_search(&body))
    }

    fn source_name(&self) -> &'static str {
        "steam_store"
    }
}
