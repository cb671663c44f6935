use reqwest::Client;
use serde_json::Value;

use crate::error::{Error, Result};

/// Canonical form of an item id: decimal ids lose surrounding whitespace and
/// leading zeros, anything else is only trimmed.
pub fn normalize_id(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.parse::<u64>() {
        Ok(n) => n.to_string(),
        Err(_) => trimmed.to_string(),
    }
}

/// Read an id that a provider may send as a JSON number or string.
pub fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => n.as_u64().map(|n| n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(normalize_id(s)),
        _ => None,
    }
}

/// GET a JSON document, mapping non-2xx to `Error::HttpStatus`.
pub async fn get_json(client: &Client, url: &str, query: &[(&str, &str)]) -> Result<Value> {
    let resp = client.get(url).query(query).send().await?;

    if !resp.status().is_success() {
        return Err(Error::HttpStatus {
            status: resp.status().as_u16(),
            url: url.to_string(),
        });
    }

    Ok(resp.json().await?)
}
