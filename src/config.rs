// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Crate configuration (spec §D): everything the Agent Loop, Approval
//! Engine, and Context Manager need supplied at construction and held
//! immutable thereafter.
//!
//! `Config` is the on-disk/serializable shape; `ResolvedConfig` is what you
//! get back from [`load_config`] after overrides are applied and defaults
//! are filled in.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};

/// Serialized configuration, normally loaded from `forge.toml`. Every field
/// is optional so a partial file only overrides what it names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// Name of the environment variable holding the provider credential —
    /// never the raw secret itself.
    pub api_key_env: Option<String>,
    pub max_iterations: Option<u32>,
    pub max_consecutive_errors: Option<u32>,
    pub max_context_tokens: Option<usize>,

    // S1 threshold-summarisation knobs (spec §4.2).
    pub compaction_trigger_pct: Option<u8>,
    pub compaction_batch_size: Option<usize>,

    // S2 tool-call-batched-summarisation knobs.
    pub compaction_age_threshold: Option<usize>,
    pub compaction_min_batch: Option<usize>,
    pub compaction_max_age: Option<usize>,

    /// Forward-compatibility escape hatch; unrecognised keys land here
    /// instead of failing deserialization.
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

/// Caller-supplied overrides, applied after `forge.toml` and after
/// environment variables (the teacher's `CliOptions` precedence order).
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub max_iterations: Option<u32>,
}

/// Fully resolved configuration, ready to hand to [`crate::agent::Agent`]
/// and friends.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub workspace_root: PathBuf,
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key_env: String,
    pub max_iterations: u32,
    pub max_consecutive_errors: u32,
    pub max_context_tokens: usize,
    pub compaction_trigger_pct: u8,
    pub compaction_batch_size: usize,
    pub compaction_age_threshold: usize,
    pub compaction_min_batch: usize,
    pub compaction_max_age: usize,
}

const DEFAULT_PROVIDER: &str = "anthropic";
const DEFAULT_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Reads `<workspace_root>/forge.toml` if present, then applies environment
/// variables, then `overrides` — in that precedence order, matching the
/// teacher's `config::load_config`.
pub fn load_config(workspace_root: &Path, overrides: CliOptions) -> Result<ResolvedConfig> {
    let file_config = read_config_file(workspace_root)?;

    let provider = overrides
        .provider
        .or_else(|| std::env::var("FORGE_PROVIDER").ok())
        .or(file_config.provider)
        .unwrap_or_else(|| DEFAULT_PROVIDER.to_string());

    let model = overrides
        .model
        .or_else(|| std::env::var("FORGE_MODEL").ok())
        .or(file_config.model);

    let base_url = overrides
        .base_url
        .or_else(|| std::env::var("FORGE_BASE_URL").ok())
        .or(file_config.base_url);

    let max_iterations = overrides
        .max_iterations
        .or(file_config.max_iterations)
        .unwrap_or(25);

    Ok(ResolvedConfig {
        workspace_root: workspace_root.to_path_buf(),
        provider,
        model,
        base_url,
        api_key_env: file_config.api_key_env.unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string()),
        max_iterations,
        max_consecutive_errors: file_config.max_consecutive_errors.unwrap_or(5),
        max_context_tokens: file_config.max_context_tokens.unwrap_or(100_000),
        compaction_trigger_pct: file_config.compaction_trigger_pct.unwrap_or(80),
        compaction_batch_size: file_config.compaction_batch_size.unwrap_or(10),
        compaction_age_threshold: file_config.compaction_age_threshold.unwrap_or(20),
        compaction_min_batch: file_config.compaction_min_batch.unwrap_or(10),
        compaction_max_age: file_config.compaction_max_age.unwrap_or(40),
    })
}

fn read_config_file(workspace_root: &Path) -> Result<Config> {
    let path = workspace_root.join("forge.toml");
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(&path)
        .map_err(|e| ForgeError::ConfigError(format!("reading {}: {e}", path.display())))?;
    toml::from_str(&text).map_err(|e| ForgeError::ConfigError(format!("parsing {}: {e}", path.display())))
}

/// Writes a starter `forge.toml` into `workspace_root`, returning its path.
/// Refuses to overwrite an existing file.
pub fn init_config(workspace_root: &Path, contents: Option<&Config>) -> Result<PathBuf> {
    let path = workspace_root.join("forge.toml");
    if path.exists() {
        return Err(ForgeError::ConfigError(format!("{} already exists", path.display())));
    }
    let config = contents.cloned().unwrap_or_default();
    let text = toml::to_string_pretty(&config).map_err(|e| ForgeError::ConfigError(e.to_string()))?;
    std::fs::write(&path, text).map_err(|e| ForgeError::ConfigError(format!("writing {}: {e}", path.display())))?;
    Ok(path)
}

/// An annotated example configuration, used by `forge config example`.
pub fn get_example_config() -> Config {
    Config {
        provider: Some(DEFAULT_PROVIDER.to_string()),
        model: Some("claude-sonnet-4-20250514".to_string()),
        base_url: None,
        api_key_env: Some(DEFAULT_API_KEY_ENV.to_string()),
        max_iterations: Some(25),
        max_consecutive_errors: Some(5),
        max_context_tokens: Some(100_000),
        compaction_trigger_pct: Some(80),
        compaction_batch_size: Some(10),
        compaction_age_threshold: Some(20),
        compaction_min_batch: Some(10),
        compaction_max_age: Some(40),
        extra: BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_defaults_with_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = load_config(dir.path(), CliOptions::default()).unwrap();
        assert_eq!(resolved.provider, "anthropic");
        assert_eq!(resolved.max_iterations, 25);
    }

    #[test]
    fn cli_override_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("forge.toml"), "provider = \"anthropic\"\nmax_iterations = 10\n").unwrap();

        let overrides = CliOptions {
            max_iterations: Some(99),
            ..Default::default()
        };
        let resolved = load_config(dir.path(), overrides).unwrap();
        assert_eq!(resolved.max_iterations, 99);
    }

    #[test]
    fn init_config_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        init_config(dir.path(), None).unwrap();
        assert!(init_config(dir.path(), None).is_err());
    }
}
