use std::{
    net::SocketAddr,
    str::FromStr,
    sync::{Arc, OnceLock},
    time::Duration,
};

use anyhow::Context;
use axum::{
    Extension, Router,
    http::{HeaderValue, Method, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::get,
    serve,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use shared::config::{Config, DatabaseConfig, LogFormat};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::{
    app_state::AppState,
    db::bootstrap,
    middleware::request_context::{self, RequestIdState},
    routes::{self, openapi::openapi_routes},
    services::{InMemoryMessageStore, MessageStore, PgMessageStore},
    tracer,
};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Process-wide Prometheus handle; installs the recorder on first use.
#[must_use]
pub fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if let Err(err) = metrics::set_global_recorder(recorder) {
                warn!(error = %err, "metrics recorder already installed");
            }
            handle
        })
        .clone()
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Initializes the global tracing subscriber from the logging configuration.
/// `RUST_LOG` takes precedence over `logging.level`.
#[must_use]
pub fn initialize_tracing(config: &Config) -> String {
    let fmt_builder = fmt::fmt()
        .with_env_filter(build_env_filter(config))
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let installed = if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).try_init()
    } else {
        fmt_builder.with_ansi(true).try_init()
    };
    if installed.is_err() {
        warn!("tracing subscriber already installed");
    }

    config.logging.level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// Creates a connection pool whose sessions carry the configured statement timeout.
///
/// # Errors
/// Returns an error if the URL is invalid or the pool cannot connect.
#[allow(clippy::cast_precision_loss)]
pub async fn create_database_pool(db: &DatabaseConfig, url: &str) -> Result<sqlx::PgPool, sqlx::Error> {
    let options = PgConnectOptions::from_str(url)?
        .options([("statement_timeout", db.statement_timeout_ms.to_string())]);

    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .acquire_timeout(db.statement_timeout())
        .connect_with(options)
        .await?;
    metrics::gauge!("db_pool_max_connections").set(f64::from(db.max_connections));
    metrics::gauge!("db_statement_timeout_ms").set(db.statement_timeout_ms as f64);
    Ok(pool)
}

/// Picks the message store: `PostgreSQL` when a database URL is configured,
/// otherwise the in-memory store.
///
/// # Errors
/// Fails when the database is unreachable or the bootstrap does not complete.
pub async fn create_message_store(config: &Config) -> anyhow::Result<Arc<dyn MessageStore>> {
    let Some(url) = config.db.url.as_deref() else {
        info!(profile = %config.profile, "no database configured; using in-memory message store");
        return Ok(Arc::new(InMemoryMessageStore::new()));
    };

    let pool = create_database_pool(&config.db, url)
        .await
        .context("failed to connect to the database")?;
    bootstrap::ensure_liveness(&pool)
        .await
        .context("database liveness check failed")?;

    if config.db.run_bootstrap {
        bootstrap::run(&pool, &config.db).await?;
    }
    bootstrap::ensure_readiness(&pool).await?;

    Ok(Arc::new(PgMessageStore::new(pool)))
}

/// CORS layer; an empty origin list allows any origin.
#[must_use]
pub fn create_cors_layer(config: &Config) -> CorsLayer {
    let mut cors = CorsLayer::new()
        .allow_methods(AllowMethods::list([
            Method::GET,
            Method::POST,
            Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::any())
        .allow_credentials(config.server.cors.allow_credentials)
        .max_age(Duration::from_secs(config.server.cors.max_age_seconds));

    if config.server.cors.allowed_origins.is_empty() {
        cors = cors.allow_origin(AllowOrigin::any());
    } else {
        let origins = config
            .server
            .cors
            .allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect::<Vec<_>>();
        cors = cors.allow_origin(AllowOrigin::list(origins));
    }

    cors
}

/// Creates the application router with every route and middleware layer.
pub fn create_app_router(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let cors = create_cors_layer(&state.config);
    let request_id_state = RequestIdState::from_config(&state.config);

    Router::new()
        .nest(
            "/api",
            routes::messages::create_router_messages(state.clone()),
        )
        .merge(routes::health::create_health_router())
        .route("/metrics", get(metrics_endpoint))
        .merge(openapi_routes())
        .layer(Extension(metrics_handle))
        .layer(cors)
        .layer(tracer::create_trace_layer())
        .layer(middleware::from_fn_with_state(
            request_id_state,
            request_context::assign_request_id,
        ))
        .with_state(state)
}

/// Resolves when the process receives Ctrl+C, after cancelling `shutdown`.
pub async fn create_shutdown_signal(shutdown: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
    shutdown.cancel();
}

/// Starts the server and serves until shutdown.
///
/// # Errors
/// Returns an error if the store cannot be created or the listener fails.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let level = initialize_tracing(&config);
    info!(profile = %config.profile, %level, "Starting server...");

    let metrics_handle = metrics_handle();
    let config = Arc::new(config);

    let store = create_message_store(&config).await?;
    info!(backend = store.backend(), "message store ready");

    let state = Arc::new(AppState::new(config.clone(), store));
    let shutdown = state.shutdown.clone();
    let app = create_app_router(state, metrics_handle);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    serve(listener, app)
        .with_graceful_shutdown(create_shutdown_signal(shutdown))
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use shared::config::Profile;
    use std::{
        io::{self, Write},
        sync::Mutex,
    };
    use tower::ServiceExt;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct BufferMakeWriter(Arc<Mutex<Vec<u8>>>);

    struct BufferWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> MakeWriter<'a> for BufferMakeWriter {
        type Writer = BufferWriter;

        fn make_writer(&'a self) -> Self::Writer {
            BufferWriter(Arc::clone(&self.0))
        }
    }

    impl Write for BufferWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn json_log_format_produces_json_output() {
        let mut config = Config::default_for_profile(Profile::Dev);
        config.logging.format = LogFormat::Json;
        let buffer = Arc::new(Mutex::new(Vec::new()));

        let subscriber = fmt::fmt()
            .with_env_filter(build_env_filter(&config))
            .with_writer(BufferMakeWriter(buffer.clone()))
            .json()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            info!(event = "json_test", "log entry");
        });

        let contents = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        let line = contents.lines().find(|line| !line.trim().is_empty()).unwrap();
        let value: Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["fields"]["message"], "log entry");
        assert_eq!(value["fields"]["event"], "json_test");
    }

    #[test]
    fn initialize_tracing_returns_configured_level() {
        let config = Config::default_for_profile(Profile::Test);
        assert_eq!(initialize_tracing(&config), "warn");
        // A second call must not panic.
        let _ = initialize_tracing(&config);
    }

    #[tokio::test]
    async fn in_memory_store_is_used_without_database_url() {
        let config = Config::default_for_profile(Profile::Dev);
        let store = create_message_store(&config).await.unwrap();
        assert_eq!(store.backend(), "memory");
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_payload() {
        let metrics_handle = metrics_handle();
        metrics::counter!("health_checks_total", "endpoint" => "test", "status" => "ok")
            .increment(1);
        let config = Arc::new(Config::default_for_profile(Profile::Test));
        let app = create_app_router(Arc::new(AppState::in_memory(config)), metrics_handle);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; version=0.0.4"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.contains("health_checks_total"));
    }

    #[tokio::test]
    async fn request_id_is_echoed_on_responses() {
        let config = Arc::new(Config::default_for_profile(Profile::Test));
        let app = create_app_router(Arc::new(AppState::in_memory(config)), metrics_handle());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header("x-request-id", "req-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers().get("x-request-id").unwrap(), "req-123");
    }
}
