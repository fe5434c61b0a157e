use anyhow::{anyhow, Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Supported log formats for gateway binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(anyhow!("unsupported log format: {other}")),
        }
    }
}

/// Configuration driving tracing initialisation.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub service_name: String,
    pub log_format: LogFormat,
    pub log_level: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "gateway".into(),
            log_format: LogFormat::Pretty,
            log_level: "info".into(),
        }
    }
}

/// Install the tracing subscriber with the configured formatter.
pub fn init_tracing(config: &TracingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_new(config.log_level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = Registry::default().with(env_filter);
    match config.log_format {
        LogFormat::Pretty => subscriber
            .with(fmt::layer().with_target(true))
            .try_init()
            .context("failed to install tracing subscriber")?,
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_target(true))
            .try_init()
            .context("failed to install tracing subscriber")?,
    }

    Ok(())
}

/// Prometheus exporter wrapper returning rendered metrics.
#[derive(Clone)]
pub struct MetricsExporter {
    handle: PrometheusHandle,
}

impl MetricsExporter {
    pub fn install_with_defaults() -> Result<Self> {
        Self::install(PrometheusBuilder::new())
    }

    pub fn install(builder: PrometheusBuilder) -> Result<Self> {
        let handle = builder
            .install_recorder()
            .context("failed to install Prometheus recorder")?;
        Ok(Self { handle })
    }

    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Convenience helper initialising tracing + metrics with a single call.
pub fn init(
    tracing: &TracingConfig,
    metrics_builder: Option<PrometheusBuilder>,
) -> Result<MetricsExporter> {
    init_tracing(tracing)?;
    let exporter = match metrics_builder {
        Some(builder) => MetricsExporter::install(builder)?,
        None => MetricsExporter::install_with_defaults()?,
    };
    Ok(exporter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parses_known_values() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("nonsense".parse::<LogFormat>().is_err());
    }
}
