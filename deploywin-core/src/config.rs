use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::merge::ConflictStrategy;
use crate::remote::DEFAULT_TOKEN_ENV;
use crate::repository::Identity;
use prwindow::BranchConvention;

/// Looked up in the repository work dir when no path is given
pub const CONFIG_FILE_NAME: &str = "deploywin.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// The three long-lived branches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchNames {
    pub main: String,
    pub staging: String,
    pub production: String,
}

impl Default for BranchNames {
    fn default() -> Self {
        BranchNames {
            main: "main".to_string(),
            staging: "staging".to_string(),
            production: "production".to_string(),
        }
    }
}

/// Release pipeline settings, read from `deploywin.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub branches: BranchNames,
    /// JSON file on main holding `{"version": "X.Y.Z"}`
    pub version_file: String,
    pub owner: String,
    pub pr_prefix: String,
    pub cherry_pick_prefix: String,
    pub conflict_strategy: ConflictStrategy,
    pub author: Identity,
    pub remote: String,
    /// Environment variable holding an HTTPS access token
    pub token_env: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let convention = BranchConvention::default();
        PipelineConfig {
            branches: BranchNames::default(),
            version_file: "version.json".to_string(),
            owner: convention.owner,
            pr_prefix: convention.pr_prefix,
            cherry_pick_prefix: convention.cherry_pick_prefix,
            conflict_strategy: ConflictStrategy::default(),
            author: Identity::default(),
            remote: "origin".to_string(),
            token_env: DEFAULT_TOKEN_ENV.to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `explicit` if given, else `deploywin.toml` in `workdir`, else defaults
    pub fn load(explicit: Option<&Path>, workdir: &Path) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            debug!(path = %path.display(), "loading config");
            return Self::load_from_file(path);
        }

        let candidate = workdir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            debug!(path = %candidate.display(), "loading config");
            Self::load_from_file(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    /// Naming shared with the resolver
    pub fn convention(&self) -> BranchConvention {
        BranchConvention {
            owner: self.owner.clone(),
            pr_prefix: self.pr_prefix.clone(),
            cherry_pick_prefix: self.cherry_pick_prefix.clone(),
        }
    }
}
