//! Multi-tier TOML configuration for Medlink.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > config file > defaults

use medlink_api::RetryConfig;
use medlink_session::{DEFAULT_TTL_DAYS, Routes};
use medlink_types::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the durable store file inside the config directory.
pub const STORAGE_FILE: &str = "storage.json";

/// Resolved configuration for a Medlink process.
#[derive(Debug, Clone)]
pub struct MedlinkConfig {
    pub gateway_url: String,
    pub records_url: String,
    pub clinician_id: Option<String>,
    pub session_ttl_days: i64,
    pub routes: Routes,
    pub retry: RetryConfig,
    pub config_dir: PathBuf,
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewaySettings {
    pub url: Option<String>,
    pub records_url: Option<String>,
    pub clinician_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSettings {
    pub ttl_days: Option<i64>,
    pub login_path: Option<String>,
    pub landing_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_retries: Option<u32>,
    pub initial_delay_ms: Option<u64>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub gateway_url: Option<String>,
    pub clinician_id: Option<String>,
}

impl MedlinkConfig {
    /// Load configuration from all sources, applying precedence rules.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables
    /// 3. Config file (~/.medlink/config.toml)
    /// 4. Defaults
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        let config_dir = config_dir();
        let settings = load_settings_file(&config_dir.join("config.toml"));
        Self::resolve(overrides, settings, config_dir, |key| std::env::var(key).ok())
    }

    fn resolve(
        overrides: CliOverrides,
        settings: SettingsFile,
        config_dir: PathBuf,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        // Gateway URL: CLI > env > config file, no default
        let gateway_url = overrides
            .gateway_url
            .or_else(|| env("MEDLINK_GATEWAY_URL"))
            .or(settings.gateway.url)
            .ok_or_else(|| ConfigError::MissingKey {
                key: "gateway url (set MEDLINK_GATEWAY_URL or [gateway] url in ~/.medlink/config.toml)"
                    .into(),
            })?;

        // The system of record lives next to the gateway unless told otherwise
        let records_url = env("MEDLINK_RECORDS_URL")
            .or(settings.gateway.records_url)
            .unwrap_or_else(|| gateway_url.clone());

        let clinician_id = overrides
            .clinician_id
            .or_else(|| env("MEDLINK_CLINICIAN_ID"))
            .or(settings.gateway.clinician_id);

        let session_ttl_days = settings.session.ttl_days.unwrap_or(DEFAULT_TTL_DAYS);
        if session_ttl_days <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "session.ttl_days".into(),
                message: format!("must be positive, got {session_ttl_days}"),
            });
        }

        let defaults = Routes::default();
        let routes = Routes::new(
            settings.session.login_path.unwrap_or(defaults.login),
            settings.session.landing_path.unwrap_or(defaults.landing),
        );

        let retry_defaults = RetryConfig::default();
        let retry = RetryConfig {
            max_retries: settings.retry.max_retries.unwrap_or(retry_defaults.max_retries),
            initial_delay_ms: settings
                .retry
                .initial_delay_ms
                .unwrap_or(retry_defaults.initial_delay_ms),
            ..retry_defaults
        };

        Ok(MedlinkConfig {
            gateway_url,
            records_url,
            clinician_id,
            session_ttl_days,
            routes,
            retry,
            config_dir,
        })
    }

    /// Path of the durable (secondary) store.
    pub fn storage_path(&self) -> PathBuf {
        self.config_dir.join(STORAGE_FILE)
    }
}

/// Get the Medlink config directory path (~/.medlink/).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MEDLINK_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".medlink")
}

/// Load and parse a TOML settings file, returning defaults on any error.
fn load_settings_file(path: &Path) -> SettingsFile {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Failed to parse {}: {}", path.display(), e);
            SettingsFile::default()
        }),
        Err(_) => SettingsFile::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve_with(
        overrides: CliOverrides,
        settings: SettingsFile,
        env: &[(&str, &str)],
    ) -> Result<MedlinkConfig, ConfigError> {
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MedlinkConfig::resolve(overrides, settings, PathBuf::from("/tmp/medlink"), |key| {
            env.get(key).cloned()
        })
    }

    fn parse(toml_str: &str) -> SettingsFile {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn test_default_settings() {
        let settings = SettingsFile::default();
        assert!(settings.gateway.url.is_none());
        assert!(settings.session.ttl_days.is_none());
    }

    #[test]
    fn test_settings_toml_parse() {
        let settings = parse(
            r#"
[gateway]
url = "https://gw.example.com"
records_url = "https://portal.example.com/api"
clinician_id = "C-7"

[session]
ttl_days = 14
login_path = "/entrar"

[retry]
max_retries = 4
"#,
        );
        assert_eq!(settings.gateway.url.as_deref(), Some("https://gw.example.com"));
        assert_eq!(settings.session.ttl_days, Some(14));
        assert_eq!(settings.retry.max_retries, Some(4));
        assert!(settings.retry.initial_delay_ms.is_none());
    }

    #[test]
    fn test_missing_gateway_url() {
        let err = resolve_with(CliOverrides::default(), SettingsFile::default(), &[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { .. }));
    }

    #[test]
    fn test_defaults_applied() {
        let config = resolve_with(
            CliOverrides::default(),
            parse("[gateway]\nurl = \"https://gw.example.com\"\n"),
            &[],
        )
        .unwrap();
        assert_eq!(config.records_url, "https://gw.example.com");
        assert_eq!(config.session_ttl_days, DEFAULT_TTL_DAYS);
        assert_eq!(config.routes, Routes::default());
        assert_eq!(config.retry.max_retries, RetryConfig::default().max_retries);
        assert!(config.clinician_id.is_none());
        assert_eq!(config.storage_path(), PathBuf::from("/tmp/medlink/storage.json"));
    }

    #[test]
    fn test_precedence_cli_over_env_over_file() {
        let settings = parse(
            "[gateway]\nurl = \"https://file\"\nclinician_id = \"C-file\"\n",
        );
        let env = [
            ("MEDLINK_GATEWAY_URL", "https://env"),
            ("MEDLINK_CLINICIAN_ID", "C-env"),
        ];

        let from_env = resolve_with(CliOverrides::default(), settings.clone(), &env).unwrap();
        assert_eq!(from_env.gateway_url, "https://env");
        assert_eq!(from_env.clinician_id.as_deref(), Some("C-env"));

        let from_cli = resolve_with(
            CliOverrides {
                gateway_url: Some("https://cli".into()),
                clinician_id: Some("C-cli".into()),
            },
            settings,
            &env,
        )
        .unwrap();
        assert_eq!(from_cli.gateway_url, "https://cli");
        assert_eq!(from_cli.clinician_id.as_deref(), Some("C-cli"));
    }

    #[test]
    fn test_custom_routes() {
        let config = resolve_with(
            CliOverrides::default(),
            parse(
                r#"
[gateway]
url = "https://gw"

[session]
login_path = "/entrar"
landing_path = "/inicio"
"#,
            ),
            &[],
        )
        .unwrap();
        assert_eq!(config.routes.login, "/entrar");
        assert_eq!(config.routes.landing, "/inicio");
        assert!(config.routes.is_entry("/entrar"));
    }

    #[test]
    fn test_non_positive_ttl_rejected() {
        let err = resolve_with(
            CliOverrides::default(),
            parse("[gateway]\nurl = \"https://gw\"\n[session]\nttl_days = 0\n"),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_unparseable_file_falls_back_to_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[gateway\nurl = ").unwrap();
        let settings = load_settings_file(&path);
        assert!(settings.gateway.url.is_none());
    }
}
