//! Default configuration values

use super::types::{FlowConfig, LogLevel};

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "projectflow.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "projectflow.yaml";

/// Log level used when neither the node nor the orchestrator sets one
pub const FALLBACK_LOG_LEVEL: LogLevel = LogLevel::Info;

/// Elapsed-time reporting used when neither the node nor the orchestrator sets it
pub const FALLBACK_REPORT_ELAPSED: bool = true;

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ".projectflow.toml",
        ".projectflow.yaml",
    ]
}

/// Generate default configuration TOML
pub fn default_config_toml() -> String {
    let config = FlowConfig::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| DEFAULT_CONFIG_TEMPLATE.to_string())
}

/// Default configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# ProjectFlow configuration

[directories]
input = "input"
intermediate = "intermediate"
output = "output"
create = true

[defaults]
# log_level = "info"
# report_elapsed = true

[execution]
# max_workers = 4
failure_policy = "dispatch_all"

[paths]
fallback = "strict"
search = []
"#;
