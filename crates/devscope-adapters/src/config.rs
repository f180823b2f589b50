//! Configuration management for devscope
//!
//! Stores settings in ~/.config/devscope/config.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base directory where cloned repositories live.
    #[serde(default = "default_repositories_dir")]
    pub repositories_dir: PathBuf,
    /// Directory where per-author analysis JSON and reports are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Chat model identifier sent to the API.
    #[serde(default = "default_model")]
    pub model: String,
    /// Base URL of an OpenAI-compatible chat-completions API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Round-trip budget per analysis pass.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    /// Concurrent commit analyses per author run.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Highest-effort commits analyzed per author.
    #[serde(default = "default_top_commits")]
    pub top_commits: usize,
    /// Wall-clock timeout per model round-trip, in seconds.
    #[serde(default = "default_round_timeout_secs")]
    pub round_timeout_secs: u64,
}

fn default_repositories_dir() -> PathBuf {
    PathBuf::from("repositories")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("out")
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_api_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_max_rounds() -> usize {
    3
}

fn default_concurrency() -> usize {
    3
}

fn default_top_commits() -> usize {
    4
}

fn default_round_timeout_secs() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repositories_dir: default_repositories_dir(),
            output_dir: default_output_dir(),
            model: default_model(),
            api_base_url: default_api_base_url(),
            max_rounds: default_max_rounds(),
            concurrency: default_concurrency(),
            top_commits: default_top_commits(),
            round_timeout_secs: default_round_timeout_secs(),
        }
    }
}

impl Config {
    fn sanitize(&mut self) {
        if self.max_rounds == 0 {
            self.max_rounds = default_max_rounds();
        }
        if self.concurrency == 0 {
            self.concurrency = default_concurrency();
        }
        if self.top_commits == 0 {
            self.top_commits = default_top_commits();
        }
        if self.round_timeout_secs == 0 {
            self.round_timeout_secs = default_round_timeout_secs();
        }
    }

    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("devscope"))
    }

    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str::<Config>(&content) {
                    Ok(mut config) => {
                        config.sanitize();
                        return config;
                    }
                    Err(err) => {
                        preserve_corrupt_config(&path, &content);
                        tracing::warn!(
                            error = %err,
                            "config file was corrupted; a backup was saved and defaults were loaded"
                        );
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to disk
    pub fn save(&self) -> anyhow::Result<()> {
        let mut sanitized = self.clone();
        sanitized.sanitize();
        let dir = Self::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        fs::create_dir_all(&dir)?;

        let path = dir.join("config.json");
        let content = serde_json::to_string_pretty(&sanitized)?;

        #[cfg(unix)]
        {
            write_config_atomic(&path, &content)?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&path, content)?;
        }

        Ok(())
    }

    /// API key for the model service, from the environment.
    pub fn api_key(&self) -> Option<String> {
        std::env::var("DEVSCOPE_API_KEY")
            .ok()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|key| !key.trim().is_empty())
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/devscope/config.json".to_string())
    }
}

fn preserve_corrupt_config(path: &std::path::Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

#[cfg(unix)]
fn write_config_atomic(path: &std::path::Path, content: &str) -> anyhow::Result<()> {
    use std::fs::OpenOptions;

    let tmp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;

    file.write_all(content.as_bytes())?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}
