use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderValue, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::auth::{self, AppState, AppStateInner};
use parley_api::friends;
use parley_api::messages;
use parley_api::middleware::require_auth;
use parley_api::users;
use parley_gateway::connection;
use parley_gateway::dispatcher::Dispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PARLEY_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "5000".into())
        .parse()?;

    // Init database
    let db = Arc::new(parley_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret,
        dispatcher,
    });

    // Routes
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/users", get(users::list_users))
        .route("/users/me", delete(users::delete_me))
        // Same wildcard name throughout: a user id for the conversation
        // routes, a message id for the per-message ones.
        .route("/messages/{id}", get(messages::get_conversation))
        .route(
            "/messages/conversation/{id}",
            delete(messages::delete_conversation),
        )
        .route("/messages/{id}/for-me", delete(messages::delete_for_me))
        .route(
            "/messages/{id}/for-everyone",
            delete(messages::delete_for_everyone),
        )
        .route("/friends/request", post(friends::send_request))
        .route(
            "/friends/request/{request_id}/accept",
            put(friends::accept_request),
        )
        .route(
            "/friends/request/{request_id}/reject",
            put(friends::reject_request),
        )
        .route("/friends/requests", get(friends::pending_requests))
        .route("/friends/list", get(friends::friends_list))
        .route("/friends/{friend_id}", delete(friends::remove_friend))
        .layer(middleware::from_fn(require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Comma-separated allow list from PARLEY_CLIENT_ORIGIN, or permissive for
/// local development.
fn cors_layer() -> CorsLayer {
    match std::env::var("PARLEY_CLIENT_ORIGIN") {
        Ok(origins) => {
            let origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        }
        Err(_) => CorsLayer::permissive(),
    }
}

#[derive(Debug, Deserialize)]
struct GatewayParams {
    token: Option<String>,
}

/// The connection gate: the token is checked before the upgrade completes,
/// so an unauthorized client never reaches the registry.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<GatewayParams>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let token = params.token.ok_or(StatusCode::UNAUTHORIZED)?;
    let claims = parley_gateway::auth::verify_token(&token, &state.jwt_secret)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let dispatcher = state.dispatcher.clone();
    let db = state.db.clone();
    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, dispatcher, db, claims.sub, claims.username)
    }))
}
