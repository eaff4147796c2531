//! Heap configuration - `cellheap.toml`

use crate::allocator::{cells_for, HEADER_SIZE};
use crate::errors::{ErrorKind, HeapError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "cellheap.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapConfig {
    /// Allocation granule in bytes; a power of two, at least 8
    #[serde(default = "default_cell_size")]
    pub cell_size: usize,

    /// Size of ONE nursery semispace
    #[serde(default = "default_nursery_bytes")]
    pub nursery_bytes: usize,

    /// Hard ceiling for promoted objects
    #[serde(default = "default_old_generation_bytes")]
    pub old_generation_bytes: usize,

    /// Collections an object must survive before promotion
    #[serde(default = "default_promotion_threshold")]
    pub promotion_threshold: u8,

    /// Survivors one collection may relocate; derived from the nursery when unset
    #[serde(default)]
    pub update_list_capacity: Option<usize>,

    /// Zero each evacuated semispace
    #[serde(default = "default_true")]
    pub poison_reclaimed: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            cell_size: default_cell_size(),
            nursery_bytes: default_nursery_bytes(),
            old_generation_bytes: default_old_generation_bytes(),
            promotion_threshold: default_promotion_threshold(),
            update_list_capacity: None,
            poison_reclaimed: true,
        }
    }
}

fn default_cell_size() -> usize { 16 }
fn default_nursery_bytes() -> usize { 1024 * 1024 }
fn default_old_generation_bytes() -> usize { 8 * 1024 * 1024 }
fn default_promotion_threshold() -> u8 { 3 }
fn default_true() -> bool { true }

impl HeapConfig {
    /// Small heap for tests and embedding experiments
    pub fn compact() -> Self {
        Self {
            nursery_bytes: 64 * 1024,
            old_generation_bytes: 256 * 1024,
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, HeapError> {
        let content = fs::read_to_string(path).map_err(|e| invalid("file", format!("Failed to read {}: {}", path.display(), e)))?;

        Self::parse(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self, HeapError> {
        let config: Self = toml::from_str(content).map_err(|e| invalid("file", format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Find `cellheap.toml` in the current directory or its parents
    pub fn discover() -> Self {
        let mut current = std::env::current_dir().ok();

        while let Some(dir) = current {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                if let Ok(config) = Self::load(&config_path) {
                    return config;
                }
            }

            current = dir.parent().map(|p| p.to_path_buf());
        }

        Self::default()
    }

    pub fn validate(&self) -> Result<(), HeapError> {
        if !self.cell_size.is_power_of_two() || self.cell_size < 8 || self.cell_size > 4096 {
            return Err(invalid("cell_size", format!("{} is not a power of two in 8..=4096", self.cell_size)));
        }
        if self.nursery_bytes / self.cell_size < self.header_cells() * 2 {
            return Err(invalid("nursery_bytes", format!("{} bytes cannot hold two headers", self.nursery_bytes)));
        }
        if self.old_generation_bytes < self.cell_size {
            return Err(invalid("old_generation_bytes", "must hold at least one cell".to_string()));
        }
        if self.promotion_threshold == 0 {
            return Err(invalid("promotion_threshold", "must be at least 1".to_string()));
        }
        if self.update_list_capacity == Some(0) {
            return Err(invalid("update_list_capacity", "must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Cells in one semispace
    pub fn semispace_cells(&self) -> usize {
        self.nursery_bytes / self.cell_size
    }

    /// Cells taken by a bare header
    pub fn header_cells(&self) -> usize {
        cells_for(HEADER_SIZE, self.cell_size)
    }

    /// Configured capacity, or the most objects a full semispace can hold
    pub fn effective_update_list_capacity(&self) -> usize {
        self.update_list_capacity
            .unwrap_or_else(|| self.semispace_cells() / self.header_cells())
    }

    /// Generate default configuration file content
    pub fn generate_default() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_else(|_| String::from("# Failed to generate config"))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), HeapError> {
        let content = toml::to_string_pretty(self).map_err(|e| invalid("file", format!("Failed to serialize config: {}", e)))?;

        fs::write(path, content).map_err(|e| invalid("file", format!("Failed to write config: {}", e)))
    }
}

fn invalid(field: &'static str, reason: String) -> HeapError {
    HeapError::detached(ErrorKind::InvalidConfig { field, reason })
}
