//! VM sizing and behaviour knobs.

#[cfg(feature = "serde-config")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde-config", serde(default))]
pub struct VmConfig {
    /// Undo snapshots kept; 0 disables `saveundo`.
    pub undo_levels: usize,
    /// Ceiling for `setmemsize` and heap growth, in bytes.
    pub max_memory: u32,
    /// Overrides the image header's stack size.
    pub stack_size: Option<u32>,
    /// Fixed seed for `random`; entropy when unset.
    pub rng_seed: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            undo_levels: 8,
            max_memory: 256 * 1024 * 1024,
            stack_size: None,
            rng_seed: None,
        }
    }
}

#[cfg(feature = "serde-config")]
impl VmConfig {
    /// Load from a `.json`, `.yaml` or `.yml` file. Missing fields keep
    /// their defaults.
    pub fn from_path(path: &std::path::Path) -> anyhow::Result<Self> {
        use anyhow::{Context, bail};

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let config = match ext.as_str() {
            "json" => serde_json::from_str(&text)
                .with_context(|| format!("parsing JSON config {}", path.display()))?,
            "yaml" | "yml" => serde_yaml::from_str(&text)
                .with_context(|| format!("parsing YAML config {}", path.display()))?,
            other => bail!("unsupported config format `{}`", other),
        };
        Ok(config)
    }
}
