//! Patcher configuration (phantom.toml)

use crate::error::ConfigError;
use crate::rules::{GroupSet, RuleGroup};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings for one [`crate::Patcher`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PatcherConfig {
    /// Transform threads (default: number of CPUs)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Bound on synchronous API calls made from the wrong thread
    #[serde(default = "default_api_timeout_ms")]
    pub api_timeout_ms: u64,

    /// Dispatch every event without waiting for listeners
    pub fire_and_forget: bool,

    /// Event class names dispatched without waiting
    pub fire_and_forget_events: Vec<String>,

    /// Handlers to run off the region thread, as `pkg.Class#method`
    pub async_event_handlers: Vec<String>,

    /// Rule groups to leave out
    pub disabled_groups: Vec<RuleGroup>,

    /// Package of the generated bridge classes, in internal form
    /// (`a/b/c`); derived from the plugin name when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge_package: Option<String>,
}

fn default_workers() -> usize {
    num_cpus::get().max(1)
}

fn default_api_timeout_ms() -> u64 {
    100
}

impl Default for PatcherConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            api_timeout_ms: default_api_timeout_ms(),
            fire_and_forget: false,
            fire_and_forget_events: Vec::new(),
            async_event_handlers: Vec::new(),
            disabled_groups: Vec::new(),
            bridge_package: None,
        }
    }
}

impl PatcherConfig {
    /// Load from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: PatcherConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Validation(
                "workers must be at least 1".to_string(),
            ));
        }

        if self.api_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "api_timeout_ms must be at least 1".to_string(),
            ));
        }

        for handler in &self.async_event_handlers {
            let valid = handler
                .split_once('#')
                .is_some_and(|(class, method)| !class.is_empty() && !method.is_empty());
            if !valid {
                return Err(ConfigError::Validation(format!(
                    "Invalid async handler '{}'. Expected pkg.Class#method",
                    handler
                )));
            }
        }

        if let Some(package) = &self.bridge_package {
            if !is_valid_package(package) {
                return Err(ConfigError::Validation(format!(
                    "Invalid bridge package: {}. Use internal form such as a/b/c",
                    package
                )));
            }
        }

        Ok(())
    }

    /// Enabled rule groups
    pub fn groups(&self) -> GroupSet {
        GroupSet::without(&self.disabled_groups)
    }

    /// Whether `group` is enabled
    pub fn is_enabled(&self, group: RuleGroup) -> bool {
        !self.disabled_groups.contains(&group)
    }

    /// Configured async handlers as (internal class name, method name)
    pub fn async_handlers(&self) -> Vec<(String, String)> {
        self.async_event_handlers
            .iter()
            .filter_map(|h| h.split_once('#'))
            .map(|(class, method)| (class.replace('.', "/"), method.to_string()))
            .collect()
    }
}

fn is_valid_package(package: &str) -> bool {
    !package.is_empty()
        && package.split('/').all(|segment| {
            let mut chars = segment.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}
