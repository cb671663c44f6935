use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::observer::{LogLevel, LogObserver};

/// What gets installed for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Plugin script dropped into the destination directories.
    Patch,
    /// Fix archive. Extraction is left to the user.
    Fix,
}

impl ArtifactKind {
    pub fn file_name(&self, id: &str) -> String {
        match self {
            ArtifactKind::Patch => format!("{}.lua", id),
            ArtifactKind::Fix => format!("{}.zip", id),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ArtifactKind::Patch => "patch",
            ArtifactKind::Fix => "fix",
        }
    }
}

/// Source of install artifacts.
#[async_trait]
pub trait ArtifactProvider: Send + Sync {
    /// Write the artifact for `id` to `dest`, returning the byte count.
    async fn download(
        &self,
        id: &str,
        kind: ArtifactKind,
        dest: &Path,
        observer: &dyn LogObserver,
    ) -> Result<u64>;
}

/// Streams artifacts from the patch server.
pub struct HttpArtifactProvider {
    client: Client,
    config: Config,
}

impl HttpArtifactProvider {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.network.user_agent.as_str())
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn url_for(&self, id: &str, kind: ArtifactKind) -> String {
        match kind {
            ArtifactKind::Patch => self.config.patch_url(id),
            ArtifactKind::Fix => self.config.fix_url(id),
        }
    }

    fn timeout_for(&self, kind: ArtifactKind) -> Duration {
        match kind {
            ArtifactKind::Patch => Duration::from_secs(self.config.network.patch_timeout_secs),
            ArtifactKind::Fix => Duration::from_secs(self.config.network.fix_timeout_secs),
        }
    }
}

#[async_trait]
impl ArtifactProvider for HttpArtifactProvider {
    async fn download(
        &self,
        id: &str,
        kind: ArtifactKind,
        dest: &Path,
        observer: &dyn LogObserver,
    ) -> Result<u64> {
        let url = self.url_for(id, kind);
        let mut request = self.client.get(&url).timeout(self.timeout_for(kind));
        if let Some(token) = self.config.server.access_token.as_deref() {
            request = request.header("X-Access-Token", token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(id.to_string()));
        }
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }

        let total_bytes = response.content_length().unwrap_or(0);
        observer.on_log(
            LogLevel::Info,
            &format!("Downloading {} {} ({} bytes)", kind.label(), id, total_bytes),
        );

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::fs(parent, e))?;
        }
        let mut file = fs::File::create(dest).await.map_err(|e| Error::fs(dest, e))?;

        let mut stream = response.bytes_stream();
        let mut bytes_downloaded: u64 = 0;
        let mut last_update = Instant::now();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(|e| Error::fs(dest, e))?;
            bytes_downloaded += chunk.len() as u64;

            // Throttle progress reports to every 250ms
            if last_update.elapsed() >= Duration::from_millis(250) {
                observer.on_progress(bytes_downloaded, total_bytes);
                last_update = Instant::now();
            }
        }

        file.flush().await.map_err(|e| Error::fs(dest, e))?;
        observer.on_progress(bytes_downloaded, total_bytes.max(bytes_downloaded));

        log::info!("Downloaded {} ({} bytes)", dest.display(), bytes_downloaded);
        Ok(bytes_downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_names() {
        assert_eq!(ArtifactKind::Patch.file_name("440"), "440.lua");
        assert_eq!(ArtifactKind::Fix.file_name("440"), "440.zip");
    }

    #[test]
    fn test_urls_and_deadlines() {
        let provider = HttpArtifactProvider::new(&Config::default()).unwrap();
        assert!(provider.url_for("440", ArtifactKind::Patch).ends_with("/lua/440.lua"));
        assert!(provider.url_for("440", ArtifactKind::Fix).ends_with("/fixes/440.zip"));
        assert_eq!(provider.timeout_for(ArtifactKind::Patch), Duration::from_secs(30));
        assert_eq!(provider.timeout_for(ArtifactKind::Fix), Duration::from_secs(120));
    }

    #[test]
    fn test_kind_deserializes_snake_case() {
        let kind: ArtifactKind = serde_json::from_str("\"fix\"").unwrap();
        assert_eq!(kind, ArtifactKind::Fix);
    }
}
