//! Runtime configuration types.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::runtime::memory::MAX_PAGES;

/// Runtime configuration for the managed heap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Linear memory pages allocated up front (64 KiB each)
    pub initial_pages: u32,
    /// Ceiling on linear memory growth, in pages
    pub max_pages: u32,
    /// Global reference slots in the static region
    pub global_slots: u32,
    /// Capacity of the shadow stack, in slots
    pub shadow_stack_slots: u32,
    /// Whether GC is enabled (default: true)
    pub gc_enabled: bool,
    /// Print collector statistics when a run finishes
    pub gc_stats: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            initial_pages: 1,
            max_pages: MAX_PAGES,
            global_slots: 64,
            shadow_stack_slots: 4096,
            gc_enabled: true,
            gc_stats: false,
        }
    }
}

/// Upper bound on global plus shadow-stack slots.
const MAX_STATIC_SLOTS: u64 = 1 << 24;

impl RuntimeConfig {
    /// Load a configuration from a TOML file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        Self::from_toml_str(&content)
            .map_err(|e| format!("failed to parse {}: {}", path.display(), e))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        let config: RuntimeConfig = toml::from_str(content).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("failed to serialize config: {}", e))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.initial_pages == 0 {
            return Err("initial_pages must be at least 1".to_string());
        }
        if self.max_pages == 0 || self.max_pages > MAX_PAGES {
            return Err(format!("max_pages must be between 1 and {}", MAX_PAGES));
        }
        if self.initial_pages > self.max_pages {
            return Err(format!(
                "initial_pages ({}) exceeds max_pages ({})",
                self.initial_pages, self.max_pages
            ));
        }
        if self.global_slots as u64 + self.shadow_stack_slots as u64 > MAX_STATIC_SLOTS {
            return Err(format!(
                "global_slots + shadow_stack_slots must not exceed {}",
                MAX_STATIC_SLOTS
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.gc_enabled);
        assert!(!config.gc_stats);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RuntimeConfig::from_toml_str("max_pages = 16\ngc_stats = true\n").unwrap();
        assert_eq!(config.max_pages, 16);
        assert!(config.gc_stats);
        assert_eq!(config.shadow_stack_slots, 4096);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(RuntimeConfig::from_toml_str("initial_pages = 0").is_err());
        assert!(RuntimeConfig::from_toml_str("initial_pages = 8\nmax_pages = 4").is_err());
        assert!(RuntimeConfig::from_toml_str("max_pages = 70000").is_err());
        assert!(RuntimeConfig::from_toml_str("gc_enabled = \"yes\"").is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = RuntimeConfig {
            initial_pages: 2,
            gc_enabled: false,
            ..RuntimeConfig::default()
        };
        let text = config.to_toml().unwrap();
        assert_eq!(RuntimeConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = RuntimeConfig::load(Path::new("/nonexistent/jasm.toml")).unwrap_err();
        assert!(err.starts_with("failed to read"));
    }
}
