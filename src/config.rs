//! Configuration loading.
//!
//! Reads a TOML file, deserializes into [`schema::EngineConfig`], wraps
//! file-system errors with context.

pub mod schema;

pub use schema::{EngineConfig, EngineOptions, ProjectDescriptor, SolutionDescriptor};

use std::path::Path;

use anyhow::{Context, Result};

/// Loads engine configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    load_config_str(&content)
}

/// Loads engine configuration from a TOML string.
pub fn load_config_str(content: &str) -> Result<EngineConfig> {
    toml::from_str(content).context("failed to parse config")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_str_roundtrips() {
        let toml = r#"
            [solution]
            projects = []

            [options]
            max_depth = 3
        "#;
        let config = load_config_str(toml).unwrap();
        assert_eq!(config.options.max_depth, 3);
    }

    #[test]
    fn load_config_missing_file_errors() {
        let result = load_config(Path::new("/nonexistent/testimpact.toml"));
        assert!(result.is_err());
    }
}
