use crate::error::{CliError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vidstash::{CompatibilityFilter, DownloaderConfig, ResolverConfig};

const APP_DIR_NAME: &str = "vidstash";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Metadata API instance, e.g. `https://pipedapi.example.org`
    pub instance_url: Option<String>,

    /// Where downloads are kept. Defaults to the platform data directory.
    pub storage_dir: Option<PathBuf>,

    pub filter: CompatibilityFilter,

    pub http: HttpSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub connect_timeout_secs: u64,
    /// Longest pause tolerated between two body chunks
    pub read_timeout_secs: u64,
    pub user_agent: Option<String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        let defaults = DownloaderConfig::default();
        Self {
            connect_timeout_secs: defaults.connect_timeout.as_secs(),
            read_timeout_secs: defaults.read_timeout.as_secs(),
            user_agent: None,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
            .ok_or_else(|| CliError::config("could not determine the configuration directory"))
    }

    fn resolve_path(path: Option<&Path>) -> Result<PathBuf> {
        match path {
            Some(path) => Ok(path.to_path_buf()),
            None => Self::default_path(),
        }
    }

    /// Load from `path` (or the default location). A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_path(path)?;
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let path = Self::resolve_path(path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn reset(path: Option<&Path>) -> Result<()> {
        Self::default().save(path)
    }

    pub fn show(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Store the instance base URL after a light sanity check.
    pub fn set_instance(&mut self, url: &str) -> Result<()> {
        let url = url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(CliError::InvalidInput(format!(
                "instance URL must start with http:// or https://, got `{url}`"
            )));
        }
        self.instance_url = Some(url.trim_end_matches('/').to_owned());
        Ok(())
    }

    pub fn storage_dir(&self) -> Result<PathBuf> {
        match &self.storage_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|dir| dir.join(APP_DIR_NAME))
                .ok_or_else(|| CliError::config("could not determine the data directory")),
        }
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            instance_url: self.instance_url.clone(),
            filter: self.filter.clone(),
        }
    }

    pub fn downloader_config(&self) -> DownloaderConfig {
        let mut config = DownloaderConfig {
            connect_timeout: Duration::from_secs(self.http.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.http.read_timeout_secs),
            ..Default::default()
        };
        if let Some(user_agent) = &self.http.user_agent {
            config.user_agent = user_agent.clone();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.filter, CompatibilityFilter::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.set_instance("https://pipedapi.example.org/").unwrap();
        config.storage_dir = Some(dir.path().join("store"));
        config.save(Some(&path)).unwrap();

        let loaded = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.instance_url.as_deref(), Some("https://pipedapi.example.org"));
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "instance_url = \"https://api.example\"\n").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.instance_url.as_deref(), Some("https://api.example"));
        assert_eq!(config.http, HttpSettings::default());
        assert_eq!(config.filter.excluded_formats, ["WEBM"]);
    }

    #[test]
    fn reset_discards_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = AppConfig::default();
        config.set_instance("https://api.example").unwrap();
        config.save(Some(&path)).unwrap();

        AppConfig::reset(Some(&path)).unwrap();
        assert_eq!(AppConfig::load(Some(&path)).unwrap(), AppConfig::default());
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "instance_url = [").unwrap();
        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(CliError::ConfigParse(_))
        ));
    }

    #[test]
    fn rejects_non_http_instance() {
        let mut config = AppConfig::default();
        assert!(config.set_instance("pipedapi.example.org").is_err());
        assert!(config.instance_url.is_none());
    }

    #[test]
    fn maps_to_engine_configs() {
        let mut config = AppConfig::default();
        config.set_instance("https://api.example").unwrap();
        config.http.read_timeout_secs = 5;
        config.http.user_agent = Some("custom/1.0".into());

        let resolver = config.resolver_config();
        assert_eq!(resolver.instance_base().unwrap(), "https://api.example");

        let downloader = config.downloader_config();
        assert_eq!(downloader.read_timeout, Duration::from_secs(5));
        assert_eq!(downloader.user_agent, "custom/1.0");
    }
}
