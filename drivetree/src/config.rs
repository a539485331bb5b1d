use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::model::is_email_address;
use crate::replay::BackoffPolicy;

const DEFAULT_ROOTS_FILE: &str = "roots.txt";
const DEFAULT_TREE_FILE: &str = "tree.yaml";
const DEFAULT_OWNER_FILE: &str = "owner_email.txt";
const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_PAGE_SIZE: u64 = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DRIVETREE_TOKEN is not set")]
    MissingToken,
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path} lists no root folders")]
    NoRoots { path: PathBuf },
    #[error("owner `{0}` is not an email address")]
    InvalidOwner(String),
    #[error("malformed placeholder map {path}: {source}")]
    Placeholders {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("placeholder `{token}` maps to `{value}`, which is not an email address")]
    InvalidPlaceholder { token: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    pub token: Option<String>,
    pub api_base: Option<String>,
    pub roots_file: PathBuf,
    pub tree_file: PathBuf,
    pub owner_file: PathBuf,
    pub placeholder_file: Option<PathBuf>,
    pub backoff: BackoffPolicy,
    pub page_size: u32,
}

impl TreeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let path_or = |name: &str, default: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .map_or_else(|| PathBuf::from(default), PathBuf::from)
        };
        let max_delay = read_u64(&lookup, "DRIVETREE_BACKOFF_MAX_MS").map(Duration::from_millis);
        let backoff = BackoffPolicy {
            base: Duration::from_millis(
                read_u64(&lookup, "DRIVETREE_BACKOFF_BASE_MS").unwrap_or(DEFAULT_BACKOFF_BASE_MS),
            ),
            max_delay,
            reset_on_success: read_bool(&lookup, "DRIVETREE_BACKOFF_RESET", false),
            ..BackoffPolicy::default()
        };
        let page_size = read_u64(&lookup, "DRIVETREE_PAGE_SIZE")
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(u64::from(u32::MAX)) as u32;

        Self {
            token: lookup("DRIVETREE_TOKEN").filter(|value| !value.trim().is_empty()),
            api_base: lookup("DRIVETREE_API_BASE").filter(|value| !value.trim().is_empty()),
            roots_file: path_or("DRIVETREE_ROOTS_FILE", DEFAULT_ROOTS_FILE),
            tree_file: path_or("DRIVETREE_TREE_FILE", DEFAULT_TREE_FILE),
            owner_file: path_or("DRIVETREE_OWNER_FILE", DEFAULT_OWNER_FILE),
            placeholder_file: lookup("DRIVETREE_PLACEHOLDER_FILE")
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from),
            backoff,
            page_size,
        }
    }

    pub fn require_token(&self) -> Result<&str, ConfigError> {
        self.token.as_deref().ok_or(ConfigError::MissingToken)
    }
}

fn read_u64(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<u64> {
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
}

fn read_bool(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> bool {
    lookup(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

fn meaningful_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// One slash-separated root path per line.
pub fn parse_root_paths(text: &str) -> Vec<String> {
    meaningful_lines(text).map(str::to_string).collect()
}

pub fn read_root_paths(path: &Path) -> Result<Vec<String>, ConfigError> {
    let roots = parse_root_paths(&read(path)?);
    if roots.is_empty() {
        return Err(ConfigError::NoRoots {
            path: path.to_path_buf(),
        });
    }
    Ok(roots)
}

pub fn parse_owner_email(text: &str) -> Result<Option<String>, ConfigError> {
    match meaningful_lines(text).next() {
        None => Ok(None),
        Some(line) if is_email_address(line) => Ok(Some(line.to_string())),
        Some(line) => Err(ConfigError::InvalidOwner(line.to_string())),
    }
}

/// A missing owner file means nobody receives ownership.
pub fn read_owner_email(path: &Path) -> Result<Option<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_owner_email(&text),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub fn parse_placeholders(path: &Path, text: &str) -> Result<HashMap<String, String>, ConfigError> {
    if text.trim().is_empty() {
        return Ok(HashMap::new());
    }
    let map: HashMap<String, String> =
        serde_yaml::from_str(text).map_err(|source| ConfigError::Placeholders {
            path: path.to_path_buf(),
            source,
        })?;
    if let Some((token, value)) = map.iter().find(|(_, value)| !is_email_address(value)) {
        return Err(ConfigError::InvalidPlaceholder {
            token: token.clone(),
            value: value.clone(),
        });
    }
    Ok(map)
}

pub fn read_placeholders(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    parse_placeholders(path, &read(path)?)
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}
