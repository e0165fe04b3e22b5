//! Builder limits and their TOML configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Limits and checks applied by [`crate::query::SearchQueryBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderOptions {
    /// Maximum number of steps, relation steps included.
    pub max_steps: usize,
    /// Maximum number of projected fields.
    pub max_fields: usize,
    /// Maximum number of nodes in the constraint tree.
    pub max_constraint_nodes: usize,
    /// Maximum nesting depth of the constraint tree.
    pub max_constraint_depth: usize,
    /// Maximum number of literals in a single `IN` constraint.
    pub max_in_values: usize,
    /// Whether every step must be reachable over relation steps at freeze time.
    pub require_connected_steps: bool,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            max_steps: 64,
            max_fields: 256,
            max_constraint_nodes: 10_000,
            max_constraint_depth: 256,
            max_in_values: 10_000,
            require_connected_steps: true,
        }
    }
}

impl BuilderOptions {
    /// Tight limits for queries built from untrusted input.
    pub fn strict() -> Self {
        Self {
            max_steps: 16,
            max_fields: 64,
            max_constraint_nodes: 512,
            max_constraint_depth: 32,
            max_in_values: 1_000,
            require_connected_steps: true,
        }
    }

    /// Loose limits for trusted, generated queries.
    pub fn permissive() -> Self {
        Self {
            max_steps: 1_024,
            max_fields: 4_096,
            max_constraint_nodes: 100_000,
            max_constraint_depth: 1_024,
            max_in_values: 100_000,
            require_connected_steps: false,
        }
    }

    /// Parses options from the `[query]` table of a TOML document.
    ///
    /// Missing keys keep their default values.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(contents).map_err(|source| ConfigError::Parse { path: None, source })?;
        Ok(raw.query)
    }

    /// Reads options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })?;
        Ok(raw.query)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    query: BuilderOptions,
}

/// Errors raised while loading [`BuilderOptions`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read query config {path}: {source}")]
    Read {
        /// File that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The configuration was not valid TOML or had mistyped keys.
    #[error("failed to parse query config{}: {source}", display_path(.path))]
    Parse {
        /// File being parsed, when loading from disk.
        path: Option<PathBuf>,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" {}", p.display()))
        .unwrap_or_default()
}
