// CapitalGit - Versioned content engine
// Copyright (C) 2025 CapitalGit Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.

//! Repository configuration

use crate::merge_file::{ConflictStyle, MergeFileOptions};
use crate::Signature;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Identity used for commits when the caller supplies none
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Display name
    pub name: String,
    /// Email address
    pub email: String,
}

impl Identity {
    /// This identity stamped with the current time
    pub fn signature(&self) -> Signature {
        Signature::now(self.name.clone(), self.email.clone())
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            name: "CapitalGit".to_string(),
            email: "capitalgit@localhost".to_string(),
        }
    }
}

/// Per-repository settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Logical repository name
    #[serde(default)]
    pub slug: String,

    /// Branch that reads, writes and merges target by default
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Object cache capacity (entries)
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,

    /// zlib-compress stored objects
    #[serde(default = "default_compression")]
    pub compression: bool,

    /// Context lines in unified patches
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,

    /// Conflict marker style
    #[serde(default)]
    pub conflict_style: ConflictStyle,

    /// Fallback committer identity
    #[serde(default)]
    pub committer: Identity,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            slug: String::new(),
            default_branch: default_branch(),
            cache_capacity: default_cache_capacity(),
            compression: default_compression(),
            context_lines: default_context_lines(),
            conflict_style: ConflictStyle::default(),
            committer: Identity::default(),
        }
    }
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_cache_capacity() -> u64 {
    1000
}

fn default_compression() -> bool {
    true
}

fn default_context_lines() -> usize {
    crate::patch::DEFAULT_CONTEXT_LINES
}

impl RepositoryConfig {
    /// Default configuration for the named repository
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub async fn from_toml(path: &Path) -> anyhow::Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Write configuration as TOML
    pub async fn save_toml(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("writing config {}", path.display()))?;
        Ok(())
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from `CAPITALGIT_*` environment variables
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Override fields from a variable lookup.
    ///
    /// Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("CAPITALGIT_DEFAULT_BRANCH") {
            self.default_branch = val;
        }

        if let Some(val) = lookup("CAPITALGIT_CACHE_CAPACITY") {
            self.cache_capacity = val.parse().unwrap_or(self.cache_capacity);
        }

        if let Some(val) = lookup("CAPITALGIT_COMPRESSION") {
            self.compression = val.parse().unwrap_or(self.compression);
        }

        if let Some(val) = lookup("CAPITALGIT_CONTEXT_LINES") {
            self.context_lines = val.parse().unwrap_or(self.context_lines);
        }

        if let Some(val) = lookup("CAPITALGIT_CONFLICT_STYLE") {
            self.conflict_style = val.parse().unwrap_or(self.conflict_style);
        }

        if let Some(val) = lookup("CAPITALGIT_COMMITTER_NAME") {
            self.committer.name = val;
        }

        if let Some(val) = lookup("CAPITALGIT_COMMITTER_EMAIL") {
            self.committer.email = val;
        }
    }

    /// Check values that would break the engine
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_branch.trim().is_empty() {
            anyhow::bail!("default_branch must not be empty");
        }
        crate::branch::validate_branch_name(&self.default_branch)?;
        if self.cache_capacity == 0 {
            anyhow::bail!("cache_capacity must be greater than zero");
        }
        if self.committer.name.is_empty() || self.committer.email.is_empty() {
            anyhow::bail!("committer name and email must be set");
        }
        Ok(())
    }

    /// Marker options for file merges
    pub fn merge_file_options(&self) -> MergeFileOptions {
        MergeFileOptions::with_style(self.conflict_style)
    }
}
