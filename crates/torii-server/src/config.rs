use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Application configuration loaded from a TOML file with environment
/// variable overrides.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub mapping: MappingConfig,
    #[serde(default)]
    pub severity: SeverityLevels,
    #[serde(default)]
    pub profiles: ProfilesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Validates configuration values. Runs at startup so a bad deployment
    /// never makes it to traffic.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be greater than 0".to_string());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be greater than 0".to_string());
        }
        if self.validator.timeout_ms == 0 {
            return Err("validator.timeout_ms must be greater than 0".to_string());
        }
        url::Url::parse(&self.validator.url)
            .map_err(|e| format!("validator.url is not a valid URL: {e}"))?;
        if self.mapping.path.is_empty() {
            return Err("mapping.path must not be empty".to_string());
        }
        for (name, level) in [
            ("severity.mapping_issue", self.severity.mapping_issue),
            ("severity.parsing_issue", self.severity.parsing_issue),
            (
                "severity.empty_bundle_issue",
                self.severity.empty_bundle_issue,
            ),
        ] {
            if level > 3 {
                return Err(format!("{name} must be between 0 and 3, got {level}"));
            }
        }
        if self.profiles.dir.is_some() != self.profiles.upload_url.is_some() {
            return Err("profiles.dir and profiles.upload_url must be set together".to_string());
        }
        if let Some(upload_url) = &self.profiles.upload_url {
            url::Url::parse(upload_url)
                .map_err(|e| format!("profiles.upload_url is not a valid URL: {e}"))?;
        }
        let level = self.logging.level.to_ascii_lowercase();
        let valid = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid.contains(&level.as_str()) {
            return Err(format!(
                "logging.level must be one of {valid:?}, got '{}'",
                self.logging.level
            ));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Hard cap on request body size.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_body_limit() -> usize {
    1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Endpoint of the external validation engine.
    #[serde(default = "default_validator_url")]
    pub url: String,
    /// Outbound request timeout. A slow engine degrades to a transport
    /// issue instead of hanging the request.
    #[serde(default = "default_validator_timeout_ms")]
    pub timeout_ms: u64,
}

impl ValidatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            url: default_validator_url(),
            timeout_ms: default_validator_timeout_ms(),
        }
    }
}

fn default_validator_url() -> String {
    "http://localhost:8880/validate".to_string()
}

fn default_validator_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    /// JSON file holding the resource type to profile table.
    #[serde(default = "default_mapping_path")]
    pub path: String,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            path: default_mapping_path(),
        }
    }
}

fn default_mapping_path() -> String {
    "maps/validation_mapping.json".to_string()
}

/// Issue severity levels by category: 0 = information, 1 = warning,
/// 2 = error, 3 = fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityLevels {
    #[serde(default = "default_mapping_issue_level")]
    pub mapping_issue: u8,
    #[serde(default = "default_parsing_issue_level")]
    pub parsing_issue: u8,
    #[serde(default = "default_empty_bundle_issue_level")]
    pub empty_bundle_issue: u8,
}

impl Default for SeverityLevels {
    fn default() -> Self {
        Self {
            mapping_issue: default_mapping_issue_level(),
            parsing_issue: default_parsing_issue_level(),
            empty_bundle_issue: default_empty_bundle_issue_level(),
        }
    }
}

fn default_mapping_issue_level() -> u8 {
    1
}

fn default_parsing_issue_level() -> u8 {
    2
}

fn default_empty_bundle_issue_level() -> u8 {
    1
}

/// Optional startup upload of profile definitions to the conformance
/// store. Both fields must be set for the upload to run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProfilesConfig {
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub upload_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Loads configuration from an optional TOML file, then applies
    /// environment variable overrides, then validates.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();

        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                let default_path = PathBuf::from("torii.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }

        // Environment variable overrides, e.g. TORII__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("TORII")
                .try_parsing(true)
                .separator("__"),
        );

        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
