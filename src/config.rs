use crate::cpu::TableStyle;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level residency configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResidencyConfig {
    pub sampling: SamplingConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Length of one measurement interval in milliseconds.
    pub interval_ms: u64,
    /// Number of intervals to report; 0 keeps going until interrupted.
    pub iterations: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            iterations: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Printed between two node columns.
    pub separator: String,
    /// Printed at the start of every table line.
    pub line_start: String,
    /// Show the C-state table.
    pub cstates: bool,
    /// Show the P-state table.
    pub pstates: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            separator: "| ".to_string(),
            line_start: String::new(),
            cstates: true,
            pstates: true,
        }
    }
}

impl DisplayConfig {
    pub fn table_style(&self) -> TableStyle {
        TableStyle {
            line_start: self.line_start.clone(),
            separator: self.separator.clone(),
            ..TableStyle::default()
        }
    }
}

const SYSTEM_CONFIG: &str = "/etc/residency/config.toml";

fn load_system() -> Option<toml::Value> {
    let path = Path::new(SYSTEM_CONFIG);
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}

/// Load the user config file (~/.config/residency/config.toml) if it exists.
fn load_user() -> Option<toml::Value> {
    let dir = dirs::config_dir()?;
    let path = dir.join("residency").join("config.toml");
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}

/// Recursively merge two TOML values. Tables are merged key-by-key;
/// all other types in `overlay` replace `base`.
fn merge_values(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_values(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

fn load_from_path(path: &Path) -> ResidencyConfig {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), "failed to parse config: {}", e);
            ResidencyConfig::default()
        }),
        Err(e) => {
            tracing::warn!(path = %path.display(), "failed to read config: {}", e);
            ResidencyConfig::default()
        }
    }
}

/// Load the merged config: system defaults, then user overrides.
/// If `override_path` is provided, use only that file instead.
pub fn load(override_path: Option<&PathBuf>) -> ResidencyConfig {
    if let Some(path) = override_path {
        return load_from_path(path);
    }

    let merged = match (load_system(), load_user()) {
        (Some(s), Some(u)) => Some(merge_values(s, u)),
        (Some(v), None) | (None, Some(v)) => Some(v),
        (None, None) => None,
    };

    match merged {
        Some(value) => value.try_into().unwrap_or_else(|e| {
            tracing::warn!("failed to deserialize config: {}", e);
            ResidencyConfig::default()
        }),
        None => ResidencyConfig::default(),
    }
}
