// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! LLM provider implementations (spec §6 "LLM provider").
//!
//! Providers are the bridge between the core's message types and an
//! external wire protocol. The core makes no assumption about that
//! protocol beyond the [`crate::types::Provider`] trait.

pub mod anthropic;

pub use anthropic::AnthropicProvider;

use crate::error::ForgeError;
use crate::types::{BoxedProvider, ProviderConfig};

/// Supported provider backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    Anthropic,
}

impl ProviderType {
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-20250514",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseProviderTypeError;

impl std::fmt::Display for ParseProviderTypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid provider type")
    }
}

impl std::error::Error for ParseProviderTypeError {}

impl std::str::FromStr for ProviderType {
    type Err = ParseProviderTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            _ => Err(ParseProviderTypeError),
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic => write!(f, "Anthropic"),
        }
    }
}

/// Constructs a provider instance from a type and configuration.
pub fn create_provider(provider_type: ProviderType, config: ProviderConfig) -> Result<BoxedProvider, ForgeError> {
    match provider_type {
        ProviderType::Anthropic => {
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| ForgeError::ProviderError("ANTHROPIC_API_KEY required".to_string()))?;
            let model = config
                .model
                .clone()
                .unwrap_or_else(|| provider_type.default_model().to_string());
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| provider_type.default_base_url().to_string());

            Ok(Box::new(AnthropicProvider::new(api_key, model, base_url, config)))
        }
    }
}

/// Constructs a provider from environment variables (`ANTHROPIC_API_KEY`,
/// `FORGE_MODEL`, `ANTHROPIC_BASE_URL`).
pub fn create_provider_from_env() -> Result<BoxedProvider, ForgeError> {
    let api_key = std::env::var("ANTHROPIC_API_KEY")
        .map_err(|_| ForgeError::ProviderError("ANTHROPIC_API_KEY not set".to_string()))?;
    let model = std::env::var("FORGE_MODEL").unwrap_or_else(|_| ProviderType::Anthropic.default_model().to_string());
    let base_url = std::env::var("ANTHROPIC_BASE_URL")
        .unwrap_or_else(|_| ProviderType::Anthropic.default_base_url().to_string());

    create_provider(
        ProviderType::Anthropic,
        ProviderConfig {
            api_key: Some(api_key),
            model: Some(model),
            base_url: Some(base_url),
            max_output_tokens: None,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_type_from_str_accepts_aliases() {
        assert_eq!("anthropic".parse::<ProviderType>(), Ok(ProviderType::Anthropic));
        assert_eq!("CLAUDE".parse::<ProviderType>(), Ok(ProviderType::Anthropic));
        assert!("gpt".parse::<ProviderType>().is_err());
    }

    #[test]
    fn create_provider_requires_api_key() {
        let config = ProviderConfig::default();
        let result = create_provider(ProviderType::Anthropic, config);
        assert!(matches!(result, Err(ForgeError::ProviderError(_))));
    }

    #[test]
    fn create_provider_succeeds_with_api_key() {
        let config = ProviderConfig::new("test-key", "claude-sonnet-4-20250514");
        let provider = create_provider(ProviderType::Anthropic, config).unwrap();
        assert_eq!(provider.name(), "Anthropic");
        assert_eq!(provider.model(), "claude-sonnet-4-20250514");
    }
}
