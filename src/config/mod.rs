// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for Dibi
//!
//! Handles loading and saving settings from ~/.dibi/settings.json

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::chat::engine::{EngineConfig, SYSTEM_PROMPT};
use crate::error::{DibiError, Result};

/// Main settings structure, stored in ~/.dibi/settings.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Completion API configuration
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Tool executor connection configuration
    #[serde(default)]
    pub mcp: McpConfig,

    /// Default settings for new sessions
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

/// Completion API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key (if stored directly, not recommended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable name for the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Default model to use
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL for the chat/completions endpoint (for custom endpoints)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Tool executor connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// WebSocket URL of the MCP executor
    #[serde(default = "default_mcp_url")]
    pub url: String,

    /// Handshake timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Default settings for new sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Maximum tokens per completion round
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Cap on model rounds per orchestration run
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,

    /// Override for the built-in system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_model() -> String {
    "gpt-4.1-nano".to_string()
}

fn default_mcp_url() -> String {
    "ws://localhost:8080/mcp".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tool_rounds() -> usize {
    8
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_api_key_env(),
            model: default_model(),
            base_url: None,
        }
    }
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            url: default_mcp_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_tool_rounds: default_max_tool_rounds(),
            system_prompt: None,
        }
    }
}

impl Settings {
    /// Default settings file location (~/.dibi/settings.json)
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| DibiError::Config("could not determine home directory".to_string()))?;
        Ok(home.join(".dibi").join("settings.json"))
    }

    /// Load settings from the default location; missing file yields defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load settings from an explicit path; missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(
                target: "dibi.config",
                path = %path.display(),
                "no settings file, using defaults"
            );
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let settings = serde_json::from_str(&raw)
            .map_err(|e| DibiError::Config(format!("invalid settings file: {}", e)))?;
        Ok(settings)
    }

    /// Save settings to an explicit path, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Resolve the API key: the environment variable named by `api_key_env`
    /// takes priority, then the stored value. Empty strings count as absent.
    pub fn resolve_api_key(&self) -> Option<String> {
        std::env::var(&self.provider.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
            .or_else(|| {
                self.provider
                    .api_key
                    .clone()
                    .filter(|key| !key.is_empty())
            })
    }

    /// Build the engine configuration for a session
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            model: self.provider.model.clone(),
            max_tokens: self.defaults.max_tokens,
            temperature: self.defaults.temperature,
            max_tool_rounds: self.defaults.max_tool_rounds,
            system_prompt: self
                .defaults
                .system_prompt
                .clone()
                .unwrap_or_else(|| SYSTEM_PROMPT.to_string()),
        }
    }
}
