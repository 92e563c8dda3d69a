use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

/// Application configuration loaded from a TOML file.
/// Every field has a default, so the file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Local cache database (overrides the XDG default).
    pub db_path: Option<PathBuf>,
    /// Directory backing the remote cache tier. Unset disables the tier.
    pub store_dir: Option<PathBuf>,
    /// Where decoded `<track-id>.wav` files live.
    pub audio_dir: PathBuf,
    /// Upper bound on one detection run.
    pub detection_timeout_secs: u64,
    pub lyrics: LyricsConfig,
    pub tools: ToolsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            store_dir: None,
            audio_dir: PathBuf::from("."),
            detection_timeout_secs: 300,
            lyrics: LyricsConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

/// LRCLIB lookup settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LyricsConfig {
    pub enabled: bool,
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for LyricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://lrclib.net/api".to_string(),
            user_agent: format!("{}/{}", crate::APP_NAME, env!("CARGO_PKG_VERSION")),
            timeout_secs: 10,
        }
    }
}

/// External programs used by the detection adapters.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub sonic_annotator: String,
    pub ffprobe: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            sonic_annotator: "sonic-annotator".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/chordsheet/config.toml`.
    /// Returns defaults if the file is missing; warns and returns defaults
    /// if it can't be read or parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn detection_timeout(&self) -> Duration {
        Duration::from_secs(self.detection_timeout_secs.max(1))
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Default local cache location under the XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("cache.db")
    } else {
        PathBuf::from("chordsheet-cache.db")
    }
}
