use std::net::{AddrParseError, SocketAddr};
use std::path::{Path, PathBuf};

use config::{Config, ConfigError as BuilderError, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_CONFIG_DIR: &str = "config";

/// Top-level configuration for the gateway, assembled from (in increasing
/// precedence) a default file, an optional profile file, environment
/// variables, and explicit CLI overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub project_name: String,
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub jwt: JwtSection,
    pub vault: VaultSection,
    pub rate_limit: RateLimitSection,
    pub observability: ObservabilitySection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub tls: Option<ServerTlsConfig>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerTlsConfig {
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
}

impl ServerSection {
    /// The address the main HTTP/WS listener binds to.
    pub fn bind_address(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtSection {
    /// JWT signing algorithm, e.g. "RS256". Must name an RSA-family variant.
    pub algorithm: String,
    #[serde(default = "default_access_expire_minutes")]
    pub access_token_expire_minutes: i64,
    #[serde(default = "default_refresh_expire_minutes")]
    pub refresh_token_expire_minutes: i64,
}

fn default_access_expire_minutes() -> i64 {
    3600
}

fn default_refresh_expire_minutes() -> i64 {
    10080
}

#[derive(Debug, Clone, Deserialize)]
pub struct VaultSection {
    pub system_code: String,
    pub vault_secret_key: String,
    pub grpc_server_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_request_interval")]
    pub request_interval_secs: u64,
    #[serde(default = "default_block_duration")]
    pub block_duration_secs: u64,
}

fn default_requests_per_second() -> u32 {
    15
}

fn default_request_interval() -> u64 {
    1
}

fn default_block_duration() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilitySection {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_metrics_bind")]
    pub metrics_bind: String,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

fn default_metrics_bind() -> String {
    "127.0.0.1".into()
}

fn default_metrics_port() -> u16 {
    9100
}

impl GatewayConfig {
    /// The address the side-channel Prometheus exporter binds to.
    pub fn metrics_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!(
            "{}:{}",
            self.observability.metrics_bind, self.observability.metrics_port
        )
        .parse()
    }
}

/// Overrides sourced from CLI flags, applied with the highest precedence.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub profile: Option<String>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Builder(#[from] BuilderError),
}

pub fn load(overrides: ConfigOverrides) -> Result<GatewayConfig, ConfigError> {
    let mut builder = Config::builder();

    match overrides.config_path {
        // An explicit --config path replaces the default-directory lookup
        // entirely, so tests and one-off deployments don't need a CWD-relative
        // "config/default.toml" to exist.
        Some(path) => builder = builder.add_source(File::from(path)),
        None => {
            builder = builder.add_source(required_file(DEFAULT_CONFIG_DIR, "default.toml"));
            if let Some(profile) = overrides.profile.as_deref() {
                let profile_file = format!("{profile}.toml");
                builder = builder.add_source(optional_file(DEFAULT_CONFIG_DIR, &profile_file));
            }
        }
    }

    builder = builder.add_source(Environment::with_prefix("GATEWAY").separator("__"));

    if let Some(host) = overrides.server_host {
        builder = builder.set_override("server.host", host)?;
    }
    if let Some(port) = overrides.server_port {
        builder = builder.set_override("server.port", port as i64)?;
    }
    if let Some(log_level) = overrides.log_level {
        builder = builder.set_override("observability.log_level", log_level)?;
    }
    if let Some(log_format) = overrides.log_format {
        builder = builder.set_override("observability.log_format", log_format)?;
    }
    if let Some(metrics_port) = overrides.metrics_port {
        builder = builder.set_override("observability.metrics_port", metrics_port as i64)?;
    }

    let config = builder.build()?;
    config.try_deserialize().map_err(ConfigError::from)
}

fn required_file(dir: &str, name: &str) -> File<config::FileSourceFile, FileFormat> {
    File::from(Path::new(dir).join(name)).format(FileFormat::Toml)
}

fn optional_file(dir: &str, name: &str) -> File<config::FileSourceFile, FileFormat> {
    File::from(Path::new(dir).join(name))
        .required(false)
        .format(FileFormat::Toml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_config_file(dir: &Path) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join("default.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
project_name = "gateway"

[server]
host = "0.0.0.0"
port = 8080

[database]
url = "postgres://localhost/gateway"

[jwt]
algorithm = "RS256"

[vault]
system_code = "GTW"
vault_secret_key = "dummy"
grpc_server_address = "http://localhost:50051"

[rate_limit]

[observability]
"#
        )
        .unwrap();
        path
    }

    #[test]
    fn loads_default_configuration() {
        let tmp = tempfile::tempdir().unwrap();
        let path = sample_config_file(tmp.path());

        let config = load(ConfigOverrides {
            config_path: Some(path),
            ..Default::default()
        })
        .expect("config loads");

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.rate_limit.requests_per_second, 15);
    }

    #[test]
    fn cli_overrides_take_precedence() {
        let tmp = tempfile::tempdir().unwrap();
        let path = sample_config_file(tmp.path());

        let config = load(ConfigOverrides {
            config_path: Some(path),
            server_port: Some(9090),
            log_level: Some("debug".into()),
            ..Default::default()
        })
        .expect("config loads with overrides");

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.observability.log_level, "debug");
    }
}
