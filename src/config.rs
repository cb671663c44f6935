use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub network: NetworkConfig,
    pub providers: ProvidersConfig,
    pub install: InstallConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the patch server hosting the index and artifacts.
    pub index_base_url: String,
    pub access_token: Option<String>,
    /// Address the local HTTP front end binds to.
    pub listen: String,
    pub frontend_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub user_agent: String,
    pub metadata_timeout_secs: u64,
    pub index_timeout_secs: u64,
    pub patch_timeout_secs: u64,
    pub fix_timeout_secs: u64,
    pub thumbnail_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub store_details_url: String,
    pub store_search_url: String,
    pub secondary_details_url: String,
    /// `{id}` is replaced with the item id.
    pub thumbnail_url_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    pub plugin_dirs: Vec<PathBuf>,
    pub default_plugin_dir: PathBuf,
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub local_result_cap: usize,
    pub name_concurrency: usize,
    pub browse_count: usize,
    pub debounce_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            index_base_url: "https://webserver-ecru.vercel.app".to_string(),
            access_token: None,
            listen: "127.0.0.1:3040".to_string(),
            frontend_dir: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: "PatchDeck/1.0".to_string(),
            metadata_timeout_secs: 10,
            index_timeout_secs: 30,
            patch_timeout_secs: 30,
            fix_timeout_secs: 120,
            thumbnail_timeout_secs: 15,
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            store_details_url: "https://store.steampowered.com/api/appdetails".to_string(),
            store_search_url: "https://store.steampowered.com/api/storesearch".to_string(),
            secondary_details_url: "https://steamspy.com/api.php".to_string(),
            thumbnail_url_template:
                "https://cdn.akamai.steamstatic.com/steam/apps/{id}/header.jpg".to_string(),
        }
    }
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            plugin_dirs: Vec::new(),
            default_plugin_dir: PathBuf::from("C:\\Program Files (x86)\\Steam\\config\\stplug-in"),
            cache_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("PatchDeck"),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            local_result_cap: 100,
            name_concurrency: 5,
            browse_count: 12,
            debounce_ms: 400,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            network: NetworkConfig::default(),
            providers: ProvidersConfig::default(),
            install: InstallConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl NetworkConfig {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn index_timeout(&self) -> Duration {
        Duration::from_secs(self.index_timeout_secs)
    }

    pub fn thumbnail_timeout(&self) -> Duration {
        Duration::from_secs(self.thumbnail_timeout_secs)
    }
}

impl Config {
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("PatchDeck")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load the config file, writing defaults on first run, then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();

        let mut config = if !path.exists() {
            let config = Self::default();
            config.save()?;
            config
        } else {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| crate::error::Error::fs(&path, e))?;
            Self::from_toml(&contents)?
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir();
        std::fs::create_dir_all(&dir).map_err(|e| crate::error::Error::fs(&dir, e))?;

        let path = Self::config_path();
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| crate::error::Error::fs(&path, e))?;

        Ok(())
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("PATCHDECK_INDEX_URL") {
            self.server.index_base_url = url;
        }
        if let Ok(token) = std::env::var("PATCHDECK_ACCESS_TOKEN") {
            self.server.access_token = Some(token).filter(|t| !t.is_empty());
        }
        if let Ok(listen) = std::env::var("PATCHDECK_LISTEN") {
            self.server.listen = listen;
        }
        if let Some(dirs) = std::env::var_os("PATCHDECK_PLUGIN_DIRS") {
            self.install.plugin_dirs = std::env::split_paths(&dirs).collect();
        }
    }

    fn validate(&self) -> Result<()> {
        Url::parse(&self.server.index_base_url)?;
        Url::parse(&self.providers.store_details_url)?;
        Url::parse(&self.providers.store_search_url)?;
        Url::parse(&self.providers.secondary_details_url)?;
        Ok(())
    }

    fn server_url(&self, path: &str) -> String {
        format!("{}/{}", self.server.index_base_url.trim_end_matches('/'), path)
    }

    pub fn index_url(&self) -> String {
        self.server_url("api/games_index.json")
    }

    pub fn patch_url(&self, id: &str) -> String {
        self.server_url(&format!("lua/{}.lua", id))
    }

    pub fn fix_url(&self, id: &str) -> String {
        self.server_url(&format!("fixes/{}.zip", id))
    }

    pub fn index_cache_path(&self) -> PathBuf {
        self.install.cache_dir.join("games_index.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            index_base_url = "http://localhost:5000/"
            listen = "0.0.0.0:9000"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.search.name_concurrency, 5);
        assert_eq!(config.search.local_result_cap, 100);
        assert_eq!(config.index_url(), "http://localhost:5000/api/games_index.json");
        assert_eq!(config.patch_url("440"), "http://localhost:5000/lua/440.lua");
    }

    #[test]
    fn test_round_trips_through_toml() {
        let mut config = Config::default();
        config.install.plugin_dirs = vec![PathBuf::from("/tmp/a"), PathBuf::from("/tmp/b")];
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed = Config::from_toml(&text).unwrap();
        assert_eq!(parsed.install.plugin_dirs, config.install.plugin_dirs);
        assert!(parsed.validate().is_ok());
    }
}
