//! Configuration loading.
//!
//! Resolution order: explicit path, then `RESEARCHD_CONFIG`, then
//! `config.toml` in the working directory. The default path is allowed to
//! be absent, in which case built-in defaults apply; an explicitly named
//! file must exist.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::error::CoreError;
use crate::orchestrator::OrchestratorConfig;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "RESEARCHD_CONFIG";

/// Top-level configuration for the orchestration engine.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub accounting: AccountingSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSettings {
    #[serde(default = "OrchestratorSettings::default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "OrchestratorSettings::default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "OrchestratorSettings::default_stuck_after_secs")]
    pub stuck_after_secs: u64,
    #[serde(default = "OrchestratorSettings::default_summary_prefix_chars")]
    pub summary_prefix_chars: usize,
}

impl OrchestratorSettings {
    const fn default_max_retries() -> u32 {
        3
    }

    const fn default_retry_delay_secs() -> u64 {
        60
    }

    const fn default_stuck_after_secs() -> u64 {
        3600
    }

    const fn default_summary_prefix_chars() -> usize {
        500
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_retries: Self::default_max_retries(),
            retry_delay_secs: Self::default_retry_delay_secs(),
            stuck_after_secs: Self::default_stuck_after_secs(),
            summary_prefix_chars: Self::default_summary_prefix_chars(),
        }
    }
}

impl From<&OrchestratorSettings> for OrchestratorConfig {
    fn from(settings: &OrchestratorSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            retry_delay: Duration::from_secs(settings.retry_delay_secs),
            stuck_after: Duration::from_secs(settings.stuck_after_secs),
            summary_prefix_chars: settings.summary_prefix_chars,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountingSettings {
    #[serde(default = "AccountingSettings::default_currency")]
    pub currency: String,
}

impl AccountingSettings {
    fn default_currency() -> String {
        "USD".to_string()
    }
}

impl Default for AccountingSettings {
    fn default() -> Self {
        Self {
            currency: Self::default_currency(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "LoggingSettings::default_level")]
    pub level: String,
}

impl LoggingSettings {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// Helper to load configuration with validation guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(path: Option<PathBuf>) -> Result<CoreConfig, CoreError> {
        let (candidate, explicit) = resolve_path(path);
        if !explicit && !candidate.exists() {
            return Ok(CoreConfig::default());
        }

        let raw = fs::read_to_string(&candidate)
            .map_err(|err| CoreError::config_io(candidate.clone(), err))?;
        let config: CoreConfig = toml::from_str(&raw)
            .map_err(|err| CoreError::InvalidConfiguration(err.to_string()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &CoreConfig) -> Result<(), CoreError> {
        if config.orchestrator.stuck_after_secs == 0 {
            return Err(CoreError::InvalidConfiguration(
                "orchestrator.stuck_after_secs must be positive".into(),
            ));
        }
        if config.orchestrator.summary_prefix_chars == 0 {
            return Err(CoreError::InvalidConfiguration(
                "orchestrator.summary_prefix_chars must be positive".into(),
            ));
        }
        if config.accounting.currency.len() != 3 {
            return Err(CoreError::InvalidConfiguration(
                "accounting.currency must be a three-letter code".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> (PathBuf, bool) {
    if let Some(path) = path {
        return (path, true);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return (PathBuf::from(from_env), true);
        }
    }

    (Path::new(DEFAULT_CONFIG_PATH).to_path_buf(), false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parses_partial_file_with_defaults() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "[orchestrator]\nmax_retries = 5\n\n[logging]\nlevel = \"debug\""
        )
        .unwrap();

        let config = ConfigLoader::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.orchestrator.max_retries, 5);
        assert_eq!(config.orchestrator.retry_delay_secs, 60);
        assert_eq!(config.accounting.currency, "USD");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn rejects_invalid_currency() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "[accounting]\ncurrency = \"DOLLARS\"").unwrap();

        let err = ConfigLoader::load(Some(file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfiguration(_)));
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let err = ConfigLoader::load(Some(PathBuf::from("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, CoreError::ConfigIo { .. }));
    }

    #[test]
    fn settings_convert_to_orchestrator_config() {
        let settings = OrchestratorSettings::default();
        let config = OrchestratorConfig::from(&settings);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(60));
        assert_eq!(config.stuck_after, Duration::from_secs(3600));
    }
}
