//! # Configuration Management Module
//!
//! All settings live in one TOML file (default `charsheet.toml`):
//!
//! - [`RepoConfig`] - which repository/branch holds the data and where the files live
//! - [`SyncConfig`] - index retry bound, name field, collision policy, index sort locale
//! - [`ListMinimums`] - minimum visible rows per repeatable list
//! - [`SessionConfig`] - location of the local state file
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use charsheet::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("charsheet.toml").await?;
//!     println!("Repository: {}/{}", config.repo.owner, config.repo.repo);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [repo]
//! owner = "vault-tec"
//! repo = "sheets"
//! branch = "main"
//! characters_dir = "data/characters"
//! index_path = "data/characters/index.json"
//!
//! [sync]
//! index_retry_limit = 1
//! name_field = "Textbox1"
//! collision_policy = "suffix"
//! collation_locale = "cs"
//!
//! [lists]
//! weapons = 6
//! ammo = 6
//! equipment = 14
//! perks = 10
//! ```
//!
//! Only `[repo]` is required; every other section falls back to its defaults.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use url::Url;

pub use crate::character::ListMinimums;
use crate::index::{NameOrder, DEFAULT_COLLATION_LOCALE};

/// Owner/repo value the generated config starts with.
pub const PLACEHOLDER: &str = "CHANGE_ME";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub repo: RepoConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub lists: ListMinimums,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_characters_dir")]
    pub characters_dir: String,
    #[serde(default = "default_index_path")]
    pub index_path: String,
    /// Read-optimized mirror, no freshness guarantee.
    #[serde(default = "default_raw_base")]
    pub raw_base: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Local checkout of the repository used as the last read fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_mirror_dir: Option<String>,
    /// Per-request timeout
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_characters_dir() -> String {
    "data/characters".to_string()
}

fn default_index_path() -> String {
    "data/characters/index.json".to_string()
}

fn default_raw_base() -> String {
    "https://raw.githubusercontent.com".to_string()
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_timeout_seconds() -> u64 {
    15
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            owner: PLACEHOLDER.to_string(),
            repo: PLACEHOLDER.to_string(),
            branch: default_branch(),
            characters_dir: default_characters_dir(),
            index_path: default_index_path(),
            raw_base: default_raw_base(),
            api_base: default_api_base(),
            local_mirror_dir: None,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl RepoConfig {
    /// Infer owner/repo from a GitHub Pages address.
    ///
    /// `https://<owner>.github.io/<repo>/` → `<owner>/<repo>`; a user site
    /// `https://<owner>.github.io/` → `<owner>/<owner>.github.io`. Branch is
    /// `main`. Returns `None` for any other host.
    pub fn from_pages_url(pages_url: &str) -> Option<Self> {
        let url = Url::parse(pages_url).ok()?;
        let host = url.host_str()?.to_ascii_lowercase();
        if !host.ends_with(".github.io") {
            return None;
        }
        let owner = host.split('.').next().filter(|s| !s.is_empty())?.to_string();
        let repo = url
            .path_segments()
            .and_then(|mut segs| segs.find(|s| !s.is_empty()).map(str::to_string))
            .unwrap_or_else(|| format!("{owner}.github.io"));
        Some(Self {
            owner,
            repo,
            ..Self::default()
        })
    }

    pub fn is_placeholder(&self) -> bool {
        self.owner.trim().is_empty()
            || self.repo.trim().is_empty()
            || self.owner == PLACEHOLDER
            || self.repo == PLACEHOLDER
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// New records whose slug is taken get `-2`, `-3`, ... appended.
    #[default]
    Suffix,
    /// New records silently reuse the existing file and index entry.
    Overwrite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Extra read-patch-write rounds after an index write conflict.
    #[serde(default = "default_index_retry_limit")]
    pub index_retry_limit: u32,
    /// Form field holding the character's display name.
    #[serde(default = "default_name_field")]
    pub name_field: String,
    #[serde(default)]
    pub collision_policy: CollisionPolicy,
    /// Locale whose collation orders the index by name.
    #[serde(default = "default_collation_locale")]
    pub collation_locale: String,
}

fn default_index_retry_limit() -> u32 {
    1
}

fn default_name_field() -> String {
    "Textbox1".to_string()
}

fn default_collation_locale() -> String {
    DEFAULT_COLLATION_LOCALE.to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            index_retry_limit: default_index_retry_limit(),
            name_field: default_name_field(),
            collision_policy: CollisionPolicy::default(),
            collation_locale: default_collation_locale(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Remembered credential and last opened character.
    #[serde(default = "default_state_file")]
    pub state_file: String,
}

fn default_state_file() -> String {
    ".charsheet-state.json".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Warn)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repo: RepoConfig::default(),
            sync: SyncConfig::default(),
            lists: ListMinimums::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;
        Self::parse(&content).map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.repo.index_path.trim().is_empty() || config.repo.characters_dir.trim().is_empty() {
            return Err(anyhow!("repo.index_path and repo.characters_dir must not be empty"));
        }
        NameOrder::new(&config.sync.collation_locale)
            .map_err(|e| anyhow!("sync.collation_locale: {}", e))?;
        Ok(config)
    }

    /// Write `self` as TOML to `path`
    pub async fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;
        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        Config::default().save(path).await
    }
}
