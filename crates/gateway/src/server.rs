use std::{net::SocketAddr, sync::Arc};

use {
    anyhow::Context,
    axum::{
        Router,
        extract::{Query, State, WebSocketUpgrade, ws::rejection::WebSocketUpgradeRejection},
        http::StatusCode,
        response::{IntoResponse, Json, Response},
        routing::{get, post},
    },
    meshrelay_auth::TokenService,
    meshrelay_config::RelayConfig,
    serde::Deserialize,
    tokio::net::TcpListener,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{debug, info, warn},
};

use crate::{
    accounts,
    auth,
    connection::{Connection, ConnectionState},
    state::{GatewayServices, GatewayState},
    ws::handle_connection,
};

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_upgrade_handler))
        .route("/register", post(accounts::register_handler))
        .route("/keys/{id}", get(accounts::public_key_handler))
        .route("/token", post(accounts::token_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /metrics` in Prometheus text format.
#[cfg(feature = "prometheus")]
pub fn metrics_router(handle: metrics_exporter_prometheus::PrometheusHandle) -> Router {
    Router::new().route(
        "/metrics",
        get(move || std::future::ready(handle.render())),
    )
}

/// Serve `app` on `listener` until `state.shutdown` is cancelled, then close
/// every session.
pub async fn serve_gateway(
    listener: TcpListener,
    state: Arc<GatewayState>,
    app: Router,
) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            let online = state.registry.identities().await;
            debug!(identities = ?online, "closing sessions");
            let closed = state.close_all_sessions().await;
            info!(sessions = closed, "gateway shutting down");
        })
        .await
        .context("gateway server failed")?;
    Ok(())
}

/// Start the relay: open the database, bind, and serve until Ctrl-C.
pub async fn start_gateway(config: RelayConfig) -> anyhow::Result<()> {
    let pool = meshrelay_store::connect(&config.database.url)
        .await
        .with_context(|| format!("failed to open database {}", config.database.url))?;
    meshrelay_store::init_schema(&pool)
        .await
        .context("failed to initialise database schema")?;

    let tokens = Arc::new(TokenService::from_config(&config.auth));
    let state = GatewayState::new(&config, GatewayServices::sqlite(pool, tokens));

    let app = build_gateway_app(Arc::clone(&state));
    #[cfg(feature = "prometheus")]
    let app = app.merge(metrics_router(crate::metrics::install_recorder()?));

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid bind address {}:{}",
                config.server.bind, config.server.port
            )
        })?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    // Startup banner.
    let lines = [
        format!("meshrelay gateway v{}", state.version),
        format!(
            "protocol v{}, listening on {}",
            meshrelay_protocol::PROTOCOL_VERSION,
            addr
        ),
        format!("database: {}", config.database.url),
        format!(
            "heartbeat {}s, idle timeout {}s, queue {}",
            config.relay.heartbeat_interval_secs,
            config.relay.idle_timeout_secs,
            config.relay.outbound_queue
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("received ctrl-c");
        shutdown.cancel();
    });

    serve_gateway(listener, state, app).await
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let sessions = state.session_count().await;
    let database = match &state.services.database {
        Some(pool) => match meshrelay_store::ping(pool).await {
            Ok(()) => "ok",
            Err(e) => {
                warn!(error = %e, "database health check failed");
                "error"
            },
        },
        None => "disabled",
    };
    let (status, label) = if database == "error" {
        (StatusCode::INTERNAL_SERVER_ERROR, "error")
    } else {
        (StatusCode::OK, "ok")
    };
    (
        status,
        Json(serde_json::json!({
            "status": label,
            "version": state.version,
            "protocol": meshrelay_protocol::PROTOCOL_VERSION,
            "sessions": sessions,
            "database": database,
            "uptime_secs": state.started_at.elapsed().as_secs(),
        })),
    )
}

#[derive(Debug, Default, Deserialize)]
struct ConnectQuery {
    token: Option<String>,
}

/// Authenticate from `?token=` and upgrade. Failures answer 401 before any
/// upgrade or registry interaction; once shutdown starts, 503.
async fn ws_upgrade_handler(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<ConnectQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.shutdown.is_cancelled() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "shutting down" })),
        )
            .into_response();
    }

    let (conn, outbound) = Connection::new(state.relay.outbound_queue);
    conn.advance(ConnectionState::Connecting, ConnectionState::Authenticating);

    let identity =
        match auth::authorize_connect(state.services.verifier.as_ref(), query.token.as_deref())
            .await
        {
            Ok(identity) => identity,
            Err(e) => {
                debug!(conn_id = conn.conn_id(), reason = e.reason(), "connect rejected");
                conn.finish_close();
                return auth::unauthorized(&e);
            },
        };
    conn.bind_identity(identity);

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            conn.finish_close();
            return rejection.into_response();
        },
    };

    // Frames above the relay limit are discarded by the decoder; the
    // transport cap only bounds memory.
    let transport_limit = state.relay.max_frame_bytes.saturating_mul(4);
    ws.max_message_size(transport_limit)
        .on_failed_upgrade(|e| debug!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| handle_connection(socket, state, conn, outbound))
        .into_response()
}
