mod handlers;

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{ConnectInfo, FromRef},
    http::{Request, StatusCode, header},
};
use plan_runner_core::config::{Config, LogFormat};
use plan_runner_jobs::JobContext;
use tokio::{net::TcpListener, signal};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    normalize_path::NormalizePathLayer,
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, MakeSpan, TraceLayer},
};
use tracing::{Level, Span};
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::handlers::build_router;

const CONFIG_ENV: &str = "PLAN_RUNNER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[derive(Clone, FromRef)]
pub struct AppState {
    config: Arc<Config>,
    jobs: JobContext,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Self {
        Self { jobs: JobContext::new(config.clone()), config }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config_exists = config_path.exists();
    let mut config = Config::load(&config_path)?;
    config.apply_env(|key| std::env::var(key).ok())?;

    init_tracing(config.server.log_format);
    if config_exists {
        tracing::info!("Loaded config from {}", config_path.display());
    } else {
        tracing::info!("No config at {}, using defaults", config_path.display());
    }
    tracing::info!(
        git = %config.runner.git.display(),
        tofu = %config.runner.tofu.display(),
        api_base_url = %config.github.api_base_url,
        request_timeout_secs = config.runner.request_timeout_secs,
        subscription = config.runner.subscription.as_deref().unwrap_or("[unset]"),
        "Runner configured"
    );

    let state = AppState::new(Arc::new(config));
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, state.config.server.port));
    let listener =
        TcpListener::bind(addr).await.with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Web server: Listening on {}", addr);

    let router = app(state).into_make_service_with_connect_info::<SocketAddr>();
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Web server error");
    tracing::info!("Shut down gracefully");
    result
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        // Default to info level
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let fmt = match format {
        LogFormat::Text => tracing_subscriber::fmt::layer().boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
    };
    tracing_subscriber::registry().with(fmt.with_filter(env_filter)).init();
}

fn app(state: AppState) -> Router {
    // A request must never outlive its own deadline by much.
    let timeout = state.config.runner.request_timeout() + Duration::from_secs(60);
    let middleware = ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(PushMakeSpan { level: Level::INFO })
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout))
        .layer(NormalizePathLayer::trim_trailing_slash());
    build_router().with_state(state).layer(middleware)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                let _ = signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}

#[derive(Debug, Clone)]
pub struct PushMakeSpan {
    level: Level,
}

impl<B> MakeSpan<B> for PushMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        // Push deliveries arrive through a load balancer
        let forwarded_for = request
            .headers()
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|s| s.trim().parse::<IpAddr>().ok());
        let ip = forwarded_for
            .or_else(|| {
                request.extensions().get::<ConnectInfo<SocketAddr>>().map(|ConnectInfo(a)| a.ip())
            })
            .unwrap_or(IpAddr::from([0, 0, 0, 0]));
        let user_agent = request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("[unknown]");
        macro_rules! make_span {
            ($level:expr) => {
                tracing::span!(
                    $level,
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    ip = %ip,
                    user_agent = %user_agent,
                )
            }
        }
        match self.level {
            Level::ERROR => make_span!(Level::ERROR),
            Level::WARN => make_span!(Level::WARN),
            Level::INFO => make_span!(Level::INFO),
            Level::DEBUG => make_span!(Level::DEBUG),
            Level::TRACE => make_span!(Level::TRACE),
        }
    }
}
