//! 配置加载
//!
//! 所有键均可缺省：
//!
//! ```toml
//! [engine]
//! worker_concurrency = 8
//! adapter_timeout = "2s"
//!
//! [engine.retry]
//! max_attempts = 3
//!
//! [engine.topics]
//! namespace = "acme/prod"
//!
//! [gateway]
//! reply_timeout = "30s"
//! ```
//!
use crate::error::AppError;
use crate::gateway::GatewayConfig;
use esync_domain::config::EngineConfig;
use esync_domain::value_object::ValueObject;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineConfig,
    pub gateway: GatewayConfig,
}

impl Settings {
    pub fn from_toml_str(source: &str) -> Result<Self, AppError> {
        let settings: Settings =
            toml::from_str(source).map_err(|e| AppError::Config(e.to_string()))?;
        settings.engine.validate()?;
        if settings.gateway.reply_timeout.is_zero() {
            return Err(AppError::Config(
                "gateway.reply_timeout must be positive".to_string(),
            ));
        }
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn empty_document_yields_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.gateway.reply_timeout, Duration::from_secs(10));
    }

    #[test]
    fn nested_tables_override_selected_keys() {
        let settings = Settings::from_toml_str(
            r#"
            [engine]
            worker_concurrency = 8
            adapter_timeout = "2s"

            [engine.retry]
            max_attempts = 3

            [engine.topics]
            namespace = "acme/prod"

            [gateway]
            reply_timeout = "30s"
            "#,
        )
        .unwrap();

        assert_eq!(settings.engine.worker_concurrency, 8);
        assert_eq!(settings.engine.adapter_timeout, Duration::from_secs(2));
        assert_eq!(settings.engine.retry.max_attempts, 3);
        assert_eq!(
            settings.engine.retry.initial_backoff,
            Duration::from_millis(20)
        );
        assert_eq!(
            settings.engine.topics.command_topic("pet"),
            "persistent://acme/prod/pet-commands"
        );
        assert_eq!(settings.gateway.reply_timeout, Duration::from_secs(30));
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = Settings::from_toml_str("[engine]\nworker_concurrency = 0").unwrap_err();
        assert!(matches!(err, AppError::Domain(_)));

        let err = Settings::from_toml_str("[gateway]\nreply_timeout = \"soon\"").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
