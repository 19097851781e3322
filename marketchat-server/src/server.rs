use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use anyhow::Context;
use axum::{
    Extension, Router,
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::get,
    serve,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use shared::config::server::{Config, DatabaseConfig, LogFormat, StorageBackend};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{EnvFilter, fmt};

use crate::{
    app_state::AppState,
    db::bootstrap,
    middleware::{
        auth::{self, IdentityState},
        request_context::{self, RequestIdState},
    },
    routes,
    store::{PgConversationStore, PgProfileDirectory},
    tracer,
};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder once per process.
///
/// # Panics
/// Panics if another metrics recorder was installed first.
pub fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
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

/// Initializes the global tracing subscriber. Returns the configured level.
/// `RUST_LOG` takes precedence over the configuration when set.
pub fn initialize_tracing(config: &Config) -> String {
    let fmt_builder = fmt::fmt()
        .with_env_filter(build_env_filter(config))
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    // A subscriber may already be installed (tests, embedding); keep it.
    let _ = if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).try_init()
    } else {
        fmt_builder.with_ansi(true).try_init()
    };

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

/// Connection options carrying the configured statement timeout as a
/// session setting.
///
/// # Errors
/// Returns an error if the database URL cannot be parsed.
pub fn database_connect_options(db: &DatabaseConfig) -> Result<PgConnectOptions, sqlx::Error> {
    let options = db.url.parse::<PgConnectOptions>()?;
    Ok(options.options([("statement_timeout", db.statement_timeout_ms.to_string())]))
}

/// Creates a Postgres pool with the configured statement timeout.
///
/// # Errors
/// Returns an error if the pool cannot connect.
pub async fn create_database_pool(db: &DatabaseConfig) -> Result<sqlx::PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(database_connect_options(db)?)
        .await?;
    metrics::gauge!("db_pool_max_connections").set(f64::from(db.max_connections));
    Ok(pool)
}

/// Builds the application state for the configured storage backend. The
/// Postgres backend is bootstrapped and probed before it is handed out.
///
/// # Errors
/// Returns an error when the database is unreachable or the bootstrap fails.
pub async fn build_state(config: Arc<Config>) -> anyhow::Result<Arc<AppState>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            info!("using in-memory conversation store");
            Ok(Arc::new(AppState::in_memory(config)))
        }
        StorageBackend::Postgres => {
            let pool = create_database_pool(&config.db)
                .await
                .context("failed to connect to postgres")?;
            bootstrap::run(&pool, &config.db)
                .await
                .context("database bootstrap failed")?;
            bootstrap::ensure_ready(&pool)
                .await
                .context("database readiness check failed")?;

            info!("using postgres conversation store");
            Ok(Arc::new(AppState::new(
                config,
                Arc::new(PgConversationStore::new(pool.clone())),
                Arc::new(PgProfileDirectory::new(pool)),
            )))
        }
    }
}

/// CORS policy from configuration; any origin when none are listed.
pub fn create_cors_layer(config: &Config) -> CorsLayer {
    use http::Method;

    let mut cors = CorsLayer::new()
        .allow_methods(AllowMethods::list([
            Method::GET,
            Method::POST,
            Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::any())
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
        if config.server.cors.allow_credentials {
            // Credentials cannot be combined with wildcard headers.
            cors = cors
                .allow_headers(AllowHeaders::mirror_request())
                .allow_credentials(true);
        }
    }

    cors
}

/// API routes nested under `/api`.
pub fn create_api_router(config: &Config) -> Router<Arc<AppState>> {
    let router = routes::conversations::create_router_conversations();
    if config.features.realtime_v1 {
        router.merge(routes::realtime::create_router_realtime())
    } else {
        router
    }
}

/// Assembles every route and the middleware stack.
pub fn create_app_router(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let config = Arc::clone(&state.config);
    let request_id_state = RequestIdState::from_config(&config);
    let identity_state = IdentityState::from_config(&config);

    let mut router = Router::new()
        .nest("/api", create_api_router(&config))
        .merge(routes::health::create_health_router())
        .route("/metrics", get(metrics_endpoint));

    if config.features.openapi_ui {
        router = router.merge(routes::openapi::openapi_routes());
    }

    // Outermost last: request id, then the trace span, then identity.
    router
        .layer(middleware::from_fn_with_state(
            identity_state,
            auth::resolve_identity,
        ))
        .layer(tracer::create_trace_layer())
        .layer(middleware::from_fn_with_state(
            request_id_state,
            request_context::assign_request_id,
        ))
        .layer(create_cors_layer(&config))
        .layer(Extension(metrics_handle))
        .with_state(state)
}

/// Resolves once Ctrl+C is received.
pub async fn create_shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    info!("Shutting down...");
}

/// Starts the server with a fully resolved configuration.
///
/// # Errors
/// Returns an error if the state cannot be built or the listener fails.
pub async fn run(config: Config) -> anyhow::Result<()> {
    initialize_tracing(&config);
    info!(profile = ?config.profile, backend = %config.storage.backend, "starting marketchat server");

    let metrics_handle = metrics_handle();
    let config = Arc::new(config);
    let state = build_state(Arc::clone(&config)).await?;
    let app = create_app_router(state, metrics_handle);

    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| {
            format!(
                "failed to bind {}:{}",
                config.server.host, config.server.port
            )
        })?;
    info!(address = %listener.local_addr()?, "listening");

    serve(listener, app)
        .with_graceful_shutdown(create_shutdown_signal())
        .await
        .context("server terminated unexpectedly")?;

    Ok(())
}
