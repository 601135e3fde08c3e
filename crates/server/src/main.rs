use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderValue, Method, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use server_api::{ApiContext, Outcome};
use shared::{
    domain::{Message, MessageId, UserId, UserProfile},
    error::{ApiError, ApiReply},
    protocol::{
        ChatDeleted, ConversationList, EditMessageRequest, LoginRequest, MessageDeleted,
        ReactRequest, SeenReceipt, SendMessageRequest, UpdateProfileRequest,
    },
};
use storage::Storage;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;
mod connection;
mod fanout;
mod presence;

use app_state::AppState;
use config::{load_settings, Settings};
use connection::ws_handler;

#[derive(Debug, Deserialize)]
struct Caller {
    user_id: UserId,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings()?;
    let storage = Storage::new(&settings.database_url)
        .await
        .map_err(|error| {
            error!(
                database_url = %settings.database_url,
                %error,
                "failed to open SQLite database; check that the parent directory exists"
            );
            error
        })?;

    let state = Arc::new(AppState::new(ApiContext { storage }));
    let app = build_router(state, &settings)?;

    let addr: SocketAddr = settings.server_bind.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server shutdown complete");
    Ok(())
}

fn build_router(state: Arc<AppState>, settings: &Settings) -> anyhow::Result<Router> {
    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/login", post(login))
        .route("/users/profile", put(http_update_profile))
        .route("/users/:id", get(http_user_profile))
        .route("/conversations", get(http_list_conversations))
        .route("/conversations/:limit", get(http_list_conversations_limited))
        .route("/messages/send/:id", post(http_send_message))
        .route("/messages/edit/:id", put(http_edit_message))
        .route("/messages/react/:id", post(http_react))
        .route("/messages/marks/:id", put(http_mark_seen))
        .route("/messages/chat/:id", delete(http_delete_chat))
        .route(
            "/messages/:id",
            get(http_list_messages).delete(http_delete_message),
        )
        .route("/ws", get(ws_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(settings.max_body_bytes));

    if let Some(frontend_url) = &settings.frontend_url {
        let origin = HeaderValue::from_str(frontend_url)?;
        router = router.layer(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers(Any),
        );
    }

    Ok(router.layer(TraceLayer::new_for_http()).with_state(state))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(error) => {
                warn!(%error, "SIGTERM handler unavailable, waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
}

async fn healthz(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(error) => {
            error!(%error, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}

/// Wraps a plain handler result in the reply envelope.
fn reply<T>(result: Result<T, ApiError>) -> Json<ApiReply<T>> {
    if let Err(error) = &result {
        debug!(code = ?error.code, message = %error.message, "request rejected");
    }
    Json(result.into())
}

/// Fans out the request's events, then wraps its payload in the reply envelope.
async fn reply_and_dispatch<T>(
    state: &AppState,
    result: Result<Outcome<T>, ApiError>,
) -> Json<ApiReply<T>> {
    match result {
        Ok(outcome) => {
            state.router.dispatch(outcome.deliveries).await;
            Json(ApiReply::ok(outcome.data))
        }
        Err(error) => reply(Err(error)),
    }
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Json<ApiReply<UserProfile>> {
    reply(server_api::login(&state.api, &req).await)
}

async fn http_user_profile(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> Json<ApiReply<UserProfile>> {
    reply(server_api::user_profile(&state.api, &user_id).await)
}

async fn http_update_profile(
    State(state): State<Arc<AppState>>,
    Query(caller): Query<Caller>,
    Json(req): Json<UpdateProfileRequest>,
) -> Json<ApiReply<UserProfile>> {
    reply(server_api::update_profile(&state.api, &caller.user_id, &req).await)
}

async fn http_list_conversations(
    State(state): State<Arc<AppState>>,
    Query(caller): Query<Caller>,
) -> Json<ApiReply<ConversationList>> {
    reply(server_api::list_conversations(&state.api, &caller.user_id, None).await)
}

async fn http_list_conversations_limited(
    State(state): State<Arc<AppState>>,
    Path(limit): Path<usize>,
    Query(caller): Query<Caller>,
) -> Json<ApiReply<ConversationList>> {
    reply(server_api::list_conversations(&state.api, &caller.user_id, Some(limit)).await)
}

async fn http_list_messages(
    State(state): State<Arc<AppState>>,
    Path(partner_id): Path<UserId>,
    Query(caller): Query<Caller>,
) -> Json<ApiReply<Vec<Message>>> {
    let result = server_api::list_messages(&state.api, &caller.user_id, &partner_id).await;
    reply_and_dispatch(&state, result).await
}

async fn http_send_message(
    State(state): State<Arc<AppState>>,
    Path(partner_id): Path<UserId>,
    Query(caller): Query<Caller>,
    Json(req): Json<SendMessageRequest>,
) -> Json<ApiReply<Message>> {
    let result = server_api::send_message(&state.api, &caller.user_id, &partner_id, req).await;
    reply_and_dispatch(&state, result).await
}

async fn http_edit_message(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<MessageId>,
    Query(caller): Query<Caller>,
    Json(req): Json<EditMessageRequest>,
) -> Json<ApiReply<Message>> {
    let result = server_api::edit_message(&state.api, &caller.user_id, &message_id, &req).await;
    reply_and_dispatch(&state, result).await
}

async fn http_delete_message(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<MessageId>,
    Query(caller): Query<Caller>,
) -> Json<ApiReply<MessageDeleted>> {
    let result = server_api::delete_message(&state.api, &caller.user_id, &message_id).await;
    reply_and_dispatch(&state, result).await
}

async fn http_delete_chat(
    State(state): State<Arc<AppState>>,
    Path(partner_id): Path<UserId>,
    Query(caller): Query<Caller>,
) -> Json<ApiReply<ChatDeleted>> {
    let result = server_api::delete_chat(&state.api, &caller.user_id, &partner_id).await;
    reply_and_dispatch(&state, result).await
}

async fn http_react(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<MessageId>,
    Query(caller): Query<Caller>,
    Json(req): Json<ReactRequest>,
) -> Json<ApiReply<Message>> {
    let result = server_api::react(&state.api, &caller.user_id, &message_id, &req).await;
    reply_and_dispatch(&state, result).await
}

async fn http_mark_seen(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<MessageId>,
    Query(caller): Query<Caller>,
) -> Json<ApiReply<SeenReceipt>> {
    let result = server_api::mark_seen(&state.api, &caller.user_id, &message_id).await;
    reply_and_dispatch(&state, result).await
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "tests/realtime_tests.rs"]
mod realtime_tests;
