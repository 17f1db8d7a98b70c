//! Configuration for the root-change watcher.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RootsError};

/// Watcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// File name suffixes that are mounted as archives (`x.jar` → `x.jar!/`).
    pub archive_suffixes: Vec<String>,

    /// Extensions of files that define an entity's identity.
    pub descriptor_extensions: Vec<String>,

    /// Stop resolving events once a batch is already `Generic`.
    pub short_circuit_on_generic: bool,

    /// Capacity of the event source channel.
    pub channel_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            archive_suffixes: vec![".jar".to_string(), ".zip".to_string()],
            descriptor_extensions: vec!["iml".to_string()],
            short_circuit_on_generic: true,
            channel_capacity: 1000,
        }
    }
}

impl WatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an archive suffix.
    pub fn archive_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.archive_suffixes.push(suffix.into());
        self
    }

    /// Add a descriptor extension.
    pub fn descriptor_extension(mut self, extension: impl Into<String>) -> Self {
        self.descriptor_extensions.push(extension.into());
        self
    }

    /// Set the generic short-circuit.
    pub fn with_short_circuit(mut self, enabled: bool) -> Self {
        self.short_circuit_on_generic = enabled;
        self
    }

    /// Set the channel capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Whether `name` designates an archive to mount.
    pub fn is_archive_name(&self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        self.archive_suffixes.iter().any(|suffix| {
            lower.len() > suffix.len() && lower.ends_with(&suffix.to_ascii_lowercase())
        })
    }

    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(RootsError::Config(
                "channel_capacity must be greater than zero".to_string(),
            ));
        }
        if let Some(bad) = self.archive_suffixes.iter().find(|s| s.is_empty()) {
            return Err(RootsError::Config(format!("empty archive suffix: {bad:?}")));
        }
        Ok(())
    }
}
