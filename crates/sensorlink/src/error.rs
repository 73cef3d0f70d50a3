//! CLI error types with miette diagnostics.
//!
//! Maps `ConfigError` and `CoreError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use sensorlink_config::ConfigError;
use sensorlink_core::CoreError;

/// Process exit codes. Success is 0.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(sensorlink::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid configuration: {field}: {reason}")]
    #[diagnostic(
        code(sensorlink::invalid_config),
        help(
            "Fix the value in the config file or the matching SENSORLINK_* variable.\n\
             Run: sensorlink config show"
        )
    )]
    InvalidConfig { field: String, reason: String },

    #[error("Could not load configuration: {0}")]
    #[diagnostic(
        code(sensorlink::config),
        help("Check the TOML syntax of the config file. Run: sensorlink config path")
    )]
    Config(#[source] ConfigError),

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(
        code(sensorlink::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(sensorlink::core))]
    Core(#[from] CoreError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    #[diagnostic(code(sensorlink::json))]
    Json(#[from] serde_json::Error),

    #[error("Failed to render YAML: {0}")]
    #[diagnostic(code(sensorlink::yaml))]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to render TOML: {0}")]
    #[diagnostic(code(sensorlink::toml))]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } => exit_code::USAGE,
            Self::InvalidConfig { .. } | Self::Config(_) | Self::ConfigExists { .. } => {
                exit_code::CONFIG
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::InvalidConfig { field, reason },
            ConfigError::Io(e) => Self::Io(e),
            ConfigError::Serialization(e) => Self::Toml(e),
            other @ ConfigError::Figment(_) => Self::Config(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        let usage = CliError::Validation {
            field: "quality".into(),
            reason: "empty".into(),
        };
        assert_eq!(usage.exit_code(), exit_code::USAGE);

        let config: CliError = ConfigError::Validation {
            field: "rate.min_rate".into(),
            reason: "must be a positive number".into(),
        }
        .into();
        assert_eq!(config.exit_code(), exit_code::CONFIG);

        assert_eq!(CliError::Core(CoreError::Cancelled).exit_code(), exit_code::GENERAL);
    }
}
