//! Configuration validation

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::FlowConfig;

/// Validate configuration
pub fn validate_config(config: &FlowConfig) -> Result<()> {
    debug!("validating configuration");
    validate_directories(config)?;
    validate_execution(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_directories(config: &FlowConfig) -> Result<()> {
    let dirs = &config.directories;
    let roots = [
        ("directories.input", &dirs.input),
        ("directories.intermediate", &dirs.intermediate),
        ("directories.output", &dirs.output),
    ];

    for (field, value) in roots {
        if value.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: field.to_string(),
                message: "directory name cannot be empty".to_string(),
            }
            .into());
        }
    }

    if dirs.input == dirs.output || dirs.input == dirs.intermediate || dirs.intermediate == dirs.output
    {
        return Err(ConfigError::InvalidValue {
            field: "directories".to_string(),
            message: "input, intermediate and output must be distinct".to_string(),
        }
        .into());
    }

    Ok(())
}

fn validate_execution(config: &FlowConfig) -> Result<()> {
    if config.execution.max_workers == Some(0) {
        return Err(ConfigError::InvalidValue {
            field: "execution.max_workers".to_string(),
            message: "must be at least 1".to_string(),
        }
        .into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&FlowConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_empty_directory() {
        let mut config = FlowConfig::default();
        config.directories.output = " ".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_shared_directory() {
        let mut config = FlowConfig::default();
        config.directories.intermediate = "output".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_workers() {
        let mut config = FlowConfig::default();
        config.execution.max_workers = Some(0);
        assert!(validate_config(&config).is_err());
    }
}
