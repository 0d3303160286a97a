use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::publisher::{DEFAULT_CLIENT_MUTATION_ID, DEFAULT_ENDPOINT};
use crate::snapshot::{ListingFormat, Platform};
use crate::status::{AppGroup, StatusCandidate, StatusConfig};

pub const DEFAULT_TOKEN_ENV: &str = "GITHUB_PAT";
pub const DEFAULT_PUBLISH_TIMEOUT_SECS: u64 = 10;

/// Root configuration structure, deserialized from `config.toml`.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Seconds between poll cycles. Must be greater than zero.
    pub frequency_seconds: u64,
    /// Status shown when none of the configured groups is running.
    pub fallback_status: String,
    #[serde(default)]
    pub fallback_emoji: String,
    #[serde(default)]
    pub listing: ListingConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

/// One priority tier of process names and the statuses it can display.
#[derive(Debug, Deserialize, Clone)]
pub struct GroupConfig {
    pub names: Vec<String>,
    pub candidates: Vec<CandidateConfig>,
    /// Lower value wins.
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CandidateConfig {
    pub status_text: String,
    #[serde(default)]
    pub emoji: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ListingSource {
    /// Run an external command such as `ps -A`.
    #[default]
    Command,
    /// Query the process table in-process.
    Sysinfo,
}

/// How the process list is obtained and how its output is laid out.
/// Unset fields default to the conventions of the build platform.
#[derive(Debug, Deserialize, Default)]
pub struct ListingConfig {
    #[serde(default)]
    pub source: ListingSource,
    pub platform: Option<Platform>,
    pub header_lines: Option<usize>,
    pub command: Option<Vec<String>>,
}

impl ListingConfig {
    pub fn effective_platform(&self) -> Platform {
        self.platform.unwrap_or_else(Platform::current)
    }

    pub fn effective_format(&self) -> ListingFormat {
        let platform = self.effective_platform();
        ListingFormat {
            platform,
            header_lines: self
                .header_lines
                .unwrap_or_else(|| platform.default_header_lines()),
        }
    }

    pub fn effective_command(&self) -> Vec<String> {
        self.command
            .clone()
            .unwrap_or_else(|| self.effective_platform().default_command())
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PublisherKind {
    #[default]
    Github,
    /// Log the status instead of publishing it.
    Log,
}

#[derive(Debug, Deserialize)]
pub struct PublisherConfig {
    #[serde(default)]
    pub kind: PublisherKind,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_client_mutation_id")]
    pub client_mutation_id: String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            kind: PublisherKind::default(),
            endpoint: default_endpoint(),
            token_env: default_token_env(),
            client_mutation_id: default_client_mutation_id(),
            timeout_seconds: default_timeout(),
        }
    }
}

impl PublisherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("frequency_seconds must be greater than zero")]
    ZeroFrequency,
    #[error("group {0} has no process names")]
    NoNames(usize),
    #[error("group {0} has a blank process name")]
    BlankName(usize),
    /// Listings are split on whitespace, so such a name could never match.
    #[error("group {0} process name {1:?} contains whitespace")]
    NameWithWhitespace(usize, String),
    #[error("group {0} has no candidate statuses")]
    NoCandidates(usize),
    #[error("listing command is empty")]
    EmptyCommand,
}

impl Config {
    /// Checks the invariants the resolver relies on and builds the immutable model.
    pub fn status_config(&self) -> Result<StatusConfig, ConfigError> {
        if self.frequency_seconds == 0 {
            return Err(ConfigError::ZeroFrequency);
        }
        if self.listing.command.as_ref().is_some_and(|c| c.is_empty()) {
            return Err(ConfigError::EmptyCommand);
        }

        let mut groups = Vec::with_capacity(self.groups.len());
        for (i, group) in self.groups.iter().enumerate() {
            if group.names.is_empty() {
                return Err(ConfigError::NoNames(i));
            }
            if group.names.iter().any(|n| n.trim().is_empty()) {
                return Err(ConfigError::BlankName(i));
            }
            if let Some(name) = group
                .names
                .iter()
                .find(|n| n.trim().contains(char::is_whitespace))
            {
                return Err(ConfigError::NameWithWhitespace(i, name.clone()));
            }
            if group.candidates.is_empty() {
                return Err(ConfigError::NoCandidates(i));
            }
            let candidates = group
                .candidates
                .iter()
                .map(|c| StatusCandidate::new(&c.status_text, &c.emoji))
                .collect();
            groups.push(AppGroup::new(&group.names, candidates, group.priority));
        }

        Ok(StatusConfig {
            poll_interval: Duration::from_secs(self.frequency_seconds),
            fallback: StatusCandidate::new(&self.fallback_status, &self.fallback_emoji),
            groups,
        })
    }
}

/// Loads and parses the config file at `path`.
/// Returns an error if the file does not exist or cannot be read or parsed.
pub fn load(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

fn default_client_mutation_id() -> String {
    DEFAULT_CLIENT_MUTATION_ID.to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_PUBLISH_TIMEOUT_SECS
}
