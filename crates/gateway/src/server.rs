use std::{any::Any, future::Future, sync::Arc};

use {
    axum::{
        Router,
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    sqlx::sqlite::SqlitePoolOptions,
    tokio::{
        net::TcpListener,
        sync::broadcast::{self, error::RecvError},
    },
    tower_http::{
        catch_panic::CatchPanicLayer,
        cors::{Any as CorsAny, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{debug, error, info, warn},
};

use {
    switchboard_channels::{
        ChannelRegistry, ChannelStore, InMemoryChannelStore, WorkerEvent, WorkerFactories,
        WorkerSupervisor,
    },
    switchboard_config::{StoreBackend, StoreConfig, SwitchboardConfig},
};

use crate::{channel_store::SqliteChannelStore, envelope::ApiError, routes, state::GatewayState};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
}

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(CorsAny)
        .allow_methods(CorsAny)
        .allow_headers(CorsAny);

    Router::new()
        .route("/health", get(routes::health))
        .route(
            "/channels",
            get(routes::list_channels).post(routes::create_channel),
        )
        .route(
            "/channels/{id}",
            get(routes::get_channel)
                .post(routes::modify_channel)
                .delete(routes::delete_channel),
        )
        .route(
            "/channels/{id}/messages",
            post(routes::send_message),
        )
        .route(
            "/channels/{id}/messages/{message_id}",
            get(routes::message_status),
        )
        .fallback(routes::route_not_found)
        .method_not_allowed_fallback(routes::method_not_allowed)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { gateway: state })
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = detail, "request handler panicked");
    ApiError::internal("Panic").into_response()
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Open the channel store selected by `config`, running migrations for SQLite.
pub async fn open_channel_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn ChannelStore>> {
    match config.backend {
        StoreBackend::Memory => {
            warn!("using in-memory channel store, channels will not survive a restart");
            Ok(Arc::new(InMemoryChannelStore::new()))
        },
        StoreBackend::Sqlite => {
            let url = match &config.database_url {
                Some(url) => url.clone(),
                None => {
                    let dir = switchboard_config::data_dir();
                    std::fs::create_dir_all(&dir)?;
                    format!("sqlite://{}/switchboard.db?mode=rwc", dir.display())
                },
            };
            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect(&url)
                .await?;
            crate::run_migrations(&pool).await?;
            info!(database_url = %url, "channel store ready");
            Ok(Arc::new(SqliteChannelStore::new(pool)))
        },
    }
}

/// Log worker lifecycle events and faults until the supervisor goes away.
pub fn spawn_event_logger(mut events: broadcast::Receiver<WorkerEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(WorkerEvent::Fault {
                    channel_id,
                    message,
                }) => warn!(%channel_id, %message, "worker fault"),
                Ok(event) => debug!(?event, "worker event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "worker event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Serve the API on `listener` until `shutdown` resolves, then stop every
/// worker.
pub async fn serve(
    listener: TcpListener,
    registry: Arc<ChannelRegistry>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_gateway_app(GatewayState::new(Arc::clone(&registry)));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    registry.shutdown().await;
    Ok(())
}

/// Open the store, reconcile channels, then serve until Ctrl-C / SIGTERM.
pub async fn start_gateway(
    config: &SwitchboardConfig,
    factories: WorkerFactories,
) -> anyhow::Result<()> {
    let store = open_channel_store(&config.store).await?;
    let supervisor = Arc::new(WorkerSupervisor::from_config(factories, &config.workers));
    info!(types = ?supervisor.supported_types(), "worker factories registered");
    spawn_event_logger(supervisor.subscribe());

    // Reconcile before accepting requests.
    let registry =
        ChannelRegistry::load(store, supervisor, config.channels.restart_policy).await?;

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(
        address = %listener.local_addr()?,
        version = env!("CARGO_PKG_VERSION"),
        "switchboard gateway listening"
    );

    serve(listener, registry, shutdown_signal()).await?;
    info!("switchboard gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
