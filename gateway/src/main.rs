//! Gateway binary entrypoint (§1, §9): loads configuration, resolves its
//! collaborators, and serves the router built in [`gateway::router`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use gateway::db::Repository;
use gateway::jwt::JwtManager;
use gateway::policy::AuthorizationEngine;
use gateway::rate_limit::RateLimiter;
use gateway::vault::KeyProvider;
use gateway::{router, AppState};
use gateway_core::config::{self, ConfigOverrides, ServerTlsConfig};
use gateway_observability::{init as init_observability, LogFormat, TracingConfig};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser, Debug, Clone)]
#[command(name = "gateway", about = "Authenticating reverse-proxy gateway")]
struct GatewayCli {
    #[arg(long)]
    config: Option<std::path::PathBuf>,
    #[arg(long)]
    profile: Option<String>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long = "metrics-port")]
    metrics_port: Option<u16>,
    #[arg(long = "log-level")]
    log_level: Option<String>,
    #[arg(long = "log-format")]
    log_format: Option<String>,
}

impl GatewayCli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config.clone(),
            profile: self.profile.clone(),
            server_host: self.host.clone(),
            server_port: self.port,
            log_level: self.log_level.clone(),
            log_format: self.log_format.clone(),
            metrics_port: self.metrics_port,
        }
    }
}

/// Periodic interval for sweeping the rate limiter's per-IP table.
const RATE_LIMITER_EVICTION_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = GatewayCli::parse();
    let config = config::load(cli.overrides()).context("failed to load gateway configuration")?;

    let log_format: LogFormat = config
        .observability
        .log_format
        .parse()
        .context("invalid observability.log_format")?;
    let tracing_config = TracingConfig {
        service_name: config.project_name.clone(),
        log_format,
        log_level: config.observability.log_level.clone(),
    };
    let metrics = init_observability(&tracing_config, None).context("failed to initialise observability")?;

    let config = Arc::new(config);

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("failed to connect to the gateway database")?;
    let repo = Arc::new(Repository::new(pool));

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(600))
        .build()
        .context("failed to build upstream HTTP client")?;

    let key_provider = Arc::new(
        KeyProvider::new(
            http_client.clone(),
            &config.vault.grpc_server_address,
            &config.vault.system_code,
            &config.vault.vault_secret_key,
        )
        .context("failed to construct vault key provider")?,
    );

    let jwt = Arc::new(
        JwtManager::new(
            key_provider,
            &config.jwt.algorithm,
            config.jwt.access_token_expire_minutes,
            config.jwt.refresh_token_expire_minutes,
        )
        .context("failed to construct JWT manager")?,
    );

    let authz = Arc::new(AuthorizationEngine::new(repo.clone()));

    let rate_limiter = Arc::new(RateLimiter::new(
        config.rate_limit.requests_per_second,
        Duration::from_secs(config.rate_limit.request_interval_secs),
        Duration::from_secs(config.rate_limit.block_duration_secs),
    ));

    let state = AppState {
        config: config.clone(),
        repo,
        jwt,
        authz,
        rate_limiter: rate_limiter.clone(),
        http_client,
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RATE_LIMITER_EVICTION_INTERVAL);
        loop {
            ticker.tick().await;
            rate_limiter.evict_stale();
        }
    });

    let app = router::build(state);

    let addr = config.server.bind_address().context("invalid server bind address")?;
    let metrics_addr = config.metrics_addr().context("invalid metrics bind address")?;

    if metrics_addr != addr {
        let metrics_router = axum::Router::new().route("/metrics", axum::routing::get(move || {
            let metrics = metrics.clone();
            async move { metrics.render() }
        }));
        let metrics_listener = TcpListener::bind(metrics_addr)
            .await
            .with_context(|| format!("failed to bind metrics endpoint on {metrics_addr}"))?;
        tokio::spawn(async move {
            info!(%metrics_addr, "starting dedicated metrics listener");
            if let Err(err) = axum::serve(metrics_listener, metrics_router.into_make_service()).await {
                tracing::error!(%err, "metrics server terminated");
            }
        });
    }

    if let Some(tls) = load_rustls(config.server.tls.as_ref()).await? {
        info!(%addr, "starting TLS gateway server");
        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown_handle.graceful_shutdown(None);
        });
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .context("gateway server exited")?;
    } else {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind gateway address {addr}"))?;
        info!(%addr, "starting HTTP gateway server");
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    }

    Ok(())
}

/// Load the optional TLS material named by `server.tls`; `None` if the
/// section or either path is absent, in which case the gateway serves plain
/// HTTP (the spec names no TLS requirement; this mirrors the teacher's own
/// optional-TLS bootstrap rather than inventing a new one).
async fn load_rustls(tls: Option<&ServerTlsConfig>) -> Result<Option<RustlsConfig>> {
    if let Some(tls) = tls {
        if let (Some(cert), Some(key)) = (&tls.cert_path, &tls.key_path) {
            let config = RustlsConfig::from_pem_file(cert.clone(), key.clone())
                .await
                .context("failed to load TLS certs")?;
            return Ok(Some(config));
        }
    }
    Ok(None)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
