use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::core::constants::{DEFAULT_HOST, DEFAULT_PORT};

/// On-disk configuration, TOML in the platform config directory.
///
/// Every field is optional; command-line flags and environment variables
/// override whatever is stored here.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Config {
    /// Chat server host.
    pub host: Option<String>,
    /// Chat server port.
    pub port: Option<u16>,
    /// AI model used for summaries, keywords, sentiment and chat queries.
    pub model: Option<String>,
    /// Base URL of the OpenAI-compatible AI endpoint.
    pub ai_base_url: Option<String>,
    /// API key for the AI backend; `OPENAI_API_KEY` is the env fallback.
    pub api_key: Option<String>,
}

impl Config {
    pub fn load() -> Result<Config, Box<dyn std::error::Error>> {
        let config_path = Self::get_config_path();
        Self::load_from_path(&config_path)
    }

    pub fn load_from_path(config_path: &PathBuf) -> Result<Config, Box<dyn std::error::Error>> {
        if config_path.exists() {
            let contents = fs::read_to_string(config_path)?;
            let config: Config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let config_path = Self::get_config_path();
        self.save_to_path(&config_path)
    }

    pub fn save_to_path(&self, config_path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    fn get_config_path() -> PathBuf {
        let proj_dirs = ProjectDirs::from("org", "permacommons", "causerie")
            .expect("Failed to determine config directory");
        proj_dirs.config_dir().join("config.toml")
    }

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }
}
