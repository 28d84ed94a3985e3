//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::ActcacheConfig;
use std::path::Path;

/// Name of the configuration file looked up in a project directory.
pub const CONFIG_FILE_NAME: &str = "actcache.toml";

/// Loads `<project_dir>/actcache.toml`, or the defaults if there is no such file.
pub fn load_config(project_dir: &Path) -> Result<ActcacheConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE_NAME);
    if !config_path.exists() {
        return Ok(ActcacheConfig::default());
    }
    load_config_file(&config_path)
}

/// Loads and validates a configuration file at an explicit path.
pub fn load_config_file(path: &Path) -> Result<ActcacheConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Parses and validates a configuration from a string.
pub fn load_config_from_str(content: &str) -> Result<ActcacheConfig, ConfigError> {
    let config: ActcacheConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &ActcacheConfig) -> Result<(), ConfigError> {
    if config.cache.dir.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError("cache.dir is empty".to_string()));
    }
    if !(1..=100).contains(&config.cache.compaction_percent) {
        return Err(ConfigError::ValidationError(format!(
            "cache.compaction_percent must be between 1 and 100, got {}",
            config.cache.compaction_percent
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn empty_file_gives_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.cache.journal_interval_ms, 3_000);
        assert_eq!(config.cache.compaction_percent, 1);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[cache]
dir = "/var/cache/build/actions"
corrupted_dir = "/var/cache/build/actions.bad"
journal_interval_ms = 500
compaction_percent = 5

[log]
filter = "actcache_store=debug"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.cache.dir, PathBuf::from("/var/cache/build/actions"));
        assert_eq!(
            config.cache.corrupted_dir(),
            PathBuf::from("/var/cache/build/actions.bad")
        );
        assert_eq!(config.cache.journal_interval_ms, 500);
        assert_eq!(config.cache.compaction_percent, 5);
        assert_eq!(config.log.filter, "actcache_store=debug");
    }

    #[test]
    fn rejects_out_of_range_compaction_percent() {
        let err = load_config_from_str("[cache]\ncompaction_percent = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        let err = load_config_from_str("[cache]\ncompaction_percent = 101\n").unwrap_err();
        assert!(err.to_string().contains("101"));
    }

    #[test]
    fn rejects_empty_dir() {
        let err = load_config_from_str("[cache]\ndir = \"\"\n").unwrap_err();
        assert!(err.to_string().contains("cache.dir"));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = load_config_from_str("[cache\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.log.filter, "warn");
    }

    #[test]
    fn loads_file_from_project_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[cache]\njournal_interval_ms = 10\n",
        )
        .unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.cache.journal_interval_ms, 10);
    }
}
