use anyhow::Context as _;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use oic_monitor_gateway::server::{self, AppState};
use oic_monitor_gateway::tenant::TenantRegistry;
use oic_monitor_gateway::token_cache::TokenCache;
use oic_monitor_gateway::upstream::UpstreamClient;
use oic_monitor_gateway::VERSION;

/// Hard upper bound for draining outstanding requests on shutdown.
const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// CLI arguments for the gateway.
#[derive(Parser, Debug, Clone)]
#[command(name = "oic-monitor-gateway")]
#[command(
    version,
    about = "MCP gateway exposing cloud-integration monitoring operations as tools"
)]
struct CliArgs {
    /// Listen port for the HTTP surface.
    #[arg(short = 'p', long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Log level. Supports tracing filter syntax.
    #[arg(
        short = 'l',
        long = "log-level",
        env = "OIC_LOG",
        default_value = "info"
    )]
    log_level: String,

    /// Directory for persisted token records. Defaults to
    /// `~/.oic-monitor-gateway`.
    #[arg(long = "token-cache-dir", env = "OIC_TOKEN_CACHE_DIR")]
    token_cache_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = CliArgs::parse();
    init_logging(&args.log_level);

    tracing::info!("Starting OIC Monitor MCP Gateway v{VERSION}");
    run(args).await
}

async fn run(args: CliArgs) -> anyhow::Result<()> {
    let tenants = TenantRegistry::from_env();
    let configured: Vec<&str> = tenants.configured().iter().map(|t| t.as_str()).collect();
    if configured.is_empty() {
        anyhow::bail!(
            "no tenant is configured; set OIC_CLIENT_ID_<TENANT>, OIC_CLIENT_SECRET_<TENANT> \
             and OIC_TOKEN_URL_<TENANT> for at least one of dev, qa3, prod1, prod3"
        );
    }
    tracing::info!(tenants = ?configured, "tenant credentials loaded");

    let http = build_no_redirect_http_client()?;
    let tokens = Arc::new(TokenCache::new(http.clone(), token_cache_dir(&args)));
    // Fresh start: never serve a bearer cached across configuration changes.
    tokens.evict_all();
    let upstream = UpstreamClient::new(http, tokens.clone());

    let state = Arc::new(AppState::with_parts(tenants, upstream));
    let ct = state.shutdown.clone();
    spawn_shutdown_watcher(ct.clone());

    let app = server::router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind '{addr}'"))?;
    let bound = listener.local_addr().context("get bind address")?;
    tracing::info!("Starting MCP gateway HTTP server on {bound}");

    serve_with_drain(listener, app, ct).await?;

    tokens.evict_all();
    tracing::info!("Gateway shut down gracefully");
    Ok(())
}

fn build_no_redirect_http_client() -> anyhow::Result<reqwest::Client> {
    // Redirects are disabled; tenant endpoints are configured with their
    // final URL.
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .context("build upstream HTTP client")
}

fn token_cache_dir(args: &CliArgs) -> PathBuf {
    if let Some(dir) = &args.token_cache_dir {
        return dir.clone();
    }
    dirs::home_dir()
        .map(|home| home.join(".oic-monitor-gateway"))
        .unwrap_or_else(|| std::env::temp_dir().join("oic-monitor-gateway"))
}

fn spawn_shutdown_watcher(ct: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    tracing::warn!(error = %e, "failed to listen for Ctrl+C");
                }
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            () = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        ct.cancel();
    });
}

async fn serve_with_drain(
    listener: tokio::net::TcpListener,
    app: axum::Router,
    ct: CancellationToken,
) -> anyhow::Result<()> {
    let drain_ct = ct.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        drain_ct.cancelled().await;
    });
    let mut server = Box::pin(async move { server.await });

    tokio::select! {
        res = &mut server => res.context("serve HTTP")?,
        () = ct.cancelled() => {
            tracing::info!(
                "Draining outstanding requests (deadline {}s)",
                DRAIN_DEADLINE.as_secs()
            );
            match tokio::time::timeout(DRAIN_DEADLINE, &mut server).await {
                Ok(res) => res.context("serve HTTP during drain")?,
                Err(_) => {
                    tracing::warn!("drain deadline exceeded; terminating outstanding work");
                }
            }
        }
    }
    Ok(())
}

/// Initialize logging based on the log level string.
fn init_logging(log_level: &str) {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    // Check if stdout is a TTY for format selection.
    let is_tty = atty::is(atty::Stream::Stdout);

    if is_tty {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    }
}
