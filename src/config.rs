use std::path::Path;

use anyhow::{Context, Result};

pub use screen_config::{
    Brightness, CreationStrategy, FlipState, ResampleFilter, ScreenConfig, SurfaceSize,
};

/// Parse a YAML config file. Callers validate with [`ScreenConfig::validated`].
pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<ScreenConfig> {
    let path = path.as_ref();
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    from_yaml_str(&s).with_context(|| format!("invalid config file {}", path.display()))
}

pub fn from_yaml_str(s: &str) -> Result<ScreenConfig> {
    serde_yaml::from_str(s).context("failed to parse screen configuration")
}
