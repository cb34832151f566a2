//! Read-only admin HTTP surface (component C8): JSON listings of
//! registrations, dialogs and media-node status, plus drain/cancel-drain
//! commands targeting a single media node.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use switchboard_media::{DrainMode, MediaNodeId};

use crate::context::ServerContext;

pub fn router(ctx: ServerContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/registrations", get(list_registrations))
        .route("/dialogs", get(list_dialogs))
        .route("/media/sessions", get(list_media_sessions))
        .route("/media/nodes", get(list_media_nodes))
        .route("/media/nodes/:id/drain", post(drain_media_node))
        .route("/media/nodes/:id/drain/cancel", post(cancel_drain_media_node))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(ctx))
}

pub async fn serve(ctx: ServerContext, addr: SocketAddr) -> std::io::Result<()> {
    let app = router(ctx);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    dialogs: usize,
    registrations: usize,
}

async fn health(State(ctx): State<Arc<ServerContext>>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        dialogs: ctx.dialog_manager.count(),
        registrations: ctx.location_store.count(),
    })
}

#[derive(Serialize)]
struct RegistrationBody {
    aor: String,
    binding_id: String,
    contact: String,
    expires_at: String,
    user_agent: Option<String>,
}

async fn list_registrations(State(ctx): State<Arc<ServerContext>>) -> Json<Vec<RegistrationBody>> {
    let bindings = ctx.location_store.list();
    Json(
        bindings
            .into_iter()
            .map(|b| RegistrationBody {
                aor: b.aor,
                binding_id: b.binding_id,
                contact: b.effective_contact().to_string(),
                expires_at: b.expires_at.to_rfc3339(),
                user_agent: b.user_agent,
            })
            .collect(),
    )
}

#[derive(Serialize)]
struct DialogBody {
    call_id: String,
    state: String,
    terminate_reason: String,
    created_at: String,
    session_id: Option<String>,
}

async fn list_dialogs(State(ctx): State<Arc<ServerContext>>) -> Json<Vec<DialogBody>> {
    let mut dialogs = Vec::new();
    ctx.dialog_manager.for_each(|dialog| {
        dialogs.push(DialogBody {
            call_id: dialog.call_id.clone(),
            state: dialog.state.to_string(),
            terminate_reason: dialog.terminate_reason.to_string(),
            created_at: dialog.created_at.to_rfc3339(),
            session_id: dialog.session_id.clone(),
        });
    });
    Json(dialogs)
}

#[derive(Serialize)]
struct MediaSessionBody {
    call_id: String,
    direction: &'static str,
    client_endpoint: Option<String>,
    server_endpoint: Option<String>,
    duration_ms: i64,
    status: String,
}

/// Active media sessions, derived from every live Leg rather than queried
/// from the media plane directly (`spec.md §4.6` treats session internals
/// as opaque to the core; the core already tracks everything the admin
/// listing needs on the Leg that owns each session).
async fn list_media_sessions(State(ctx): State<Arc<ServerContext>>) -> Json<Vec<MediaSessionBody>> {
    let now = chrono::Utc::now();
    let sessions = ctx
        .legs
        .list()
        .into_iter()
        .filter_map(|leg| {
            let leg = leg.lock();
            leg.session_id?;
            let since = leg.answered_at.unwrap_or(leg.created_at);
            Some(MediaSessionBody {
                call_id: leg.call_id.clone(),
                direction: match leg.direction {
                    switchboard_b2bua::Direction::Inbound => "inbound",
                    switchboard_b2bua::Direction::Outbound => "outbound",
                },
                client_endpoint: leg.remote_addr.map(|a| a.to_string()),
                server_endpoint: leg.local_addr.map(|a| a.to_string()),
                duration_ms: (now - since).num_milliseconds().max(0),
                status: leg.state.to_string(),
            })
        })
        .collect();
    Json(sessions)
}

#[derive(Serialize)]
struct MediaNodeBody {
    id: String,
    healthy: bool,
    draining: Option<&'static str>,
    session_count: usize,
}

async fn list_media_nodes(State(ctx): State<Arc<ServerContext>>) -> Json<Vec<MediaNodeBody>> {
    let statuses = ctx.media_pool.status().await;
    Json(
        statuses
            .into_iter()
            .map(|s| MediaNodeBody {
                id: s.id.0,
                healthy: s.healthy,
                draining: s.draining.map(|m| match m {
                    DrainMode::Graceful => "graceful",
                    DrainMode::Aggressive => "aggressive",
                }),
                session_count: s.session_count,
            })
            .collect(),
    )
}

#[derive(Deserialize)]
struct DrainRequest {
    #[serde(default)]
    mode: DrainModeParam,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "lowercase")]
enum DrainModeParam {
    #[default]
    Graceful,
    Aggressive,
}

impl From<DrainModeParam> for DrainMode {
    fn from(mode: DrainModeParam) -> Self {
        match mode {
            DrainModeParam::Graceful => DrainMode::Graceful,
            DrainModeParam::Aggressive => DrainMode::Aggressive,
        }
    }
}

async fn drain_media_node(
    State(ctx): State<Arc<ServerContext>>,
    Path(id): Path<String>,
    body: Option<Json<DrainRequest>>,
) -> impl IntoResponse {
    let mode = body.map(|Json(r)| r.mode).unwrap_or_default().into();
    match ctx.media_pool.drain(&MediaNodeId(id), mode).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    }
}

async fn cancel_drain_media_node(State(ctx): State<Arc<ServerContext>>, Path(id): Path<String>) -> impl IntoResponse {
    match ctx.media_pool.cancel_drain(&MediaNodeId(id)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    }
}
