use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use super::utils::{self, id_from_value};
use super::{MetadataProvider, MetadataRecord};
use crate::config::Config;
use crate::error::{Error, Result};

/// Secondary provider, used as the fallback for id lookups.
pub struct SteamSpyProvider {
    client: Client,
    details_url: String,
}

impl SteamSpyProvider {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .user_agent(config.network.user_agent.as_str())
                .timeout(config.network.metadata_timeout())
                .build()?,
            details_url: config.providers.secondary_details_url.clone(),
        })
    }
}

/// `{"appid": 570000, "name": "Some Game", ..}`. Unknown ids come back with
/// a null or empty name.
pub fn parse_details(body: &Value, id: &str) -> Option<MetadataRecord> {
    let name = body.get("name").and_then(Value::as_str)?.trim();
    if name.is_empty() {
        return None;
    }
    match body.get("appid").and_then(id_from_value) {
        Some(returned) if returned != id => None,
        _ => Some(MetadataRecord::new(id, name)),
    }
}

#[async_trait]
impl MetadataProvider for SteamSpyProvider {
    async fn lookup_by_id(&self, id: &str) -> Result<MetadataRecord> {
        let body = utils::get_json(
            &self.client,
            &self.details_url,
            &[("request", "appdetails"), ("appid", id)],
        )
        .await?;

        parse_details(&body, id).ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn source_name(&self) -> &'static str {
        "steamspy"
    }
}
