use std::path::Path as FsPath;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{delete, get};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::context::AppContext;
use crate::domain::{FailureRecord, Job, WorkerInfo};
use crate::fsutil;
use crate::pool::WorkerPool;

/// Time allowed without hearing anything from a WebSocket peer.
const PONG_WAIT: Duration = Duration::from_secs(30);
/// Keepalive ping period; must stay below `PONG_WAIT`.
const PING_PERIOD: Duration = Duration::from_secs(27);

#[derive(Clone)]
pub struct ApiState {
    pub ctx: AppContext,
    pub pool: Arc<WorkerPool>,
}

pub fn router(state: ApiState) -> axum::Router {
    axum::Router::new()
        .route("/api/ping", get(ping))
        .route("/api/queue", get(list_queue).post(enqueue_job))
        .route("/api/queue/{id}", delete(remove_job))
        .route("/api/workers", get(list_workers))
        .route("/api/failed_videos", get(list_failed))
        .route("/api/ws", get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "message": "ping" }))
}

async fn list_queue(State(state): State<ApiState>) -> Json<Vec<Job>> {
    Json(state.ctx.queue.snapshot())
}

async fn enqueue_job(
    State(state): State<ApiState>,
    Json(request): Json<Job>,
) -> Result<Json<Job>, (StatusCode, String)> {
    let input = FsPath::new(&request.input_path);
    let exists = fsutil::path_exists(input)
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;
    if !exists {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("input file {} does not exist", request.input_path),
        ));
    }

    let job = state
        .ctx
        .store
        .insert_job(&request.input_path, &request.output_path)
        .await
        .map_err(|err| (StatusCode::BAD_REQUEST, format!("{err:#}")))?;

    state.ctx.queue.enqueue(job.clone());
    debug!(job_id = job.id, input = %job.input_path, "queued video");
    Ok(Json(job))
}

async fn remove_job(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<Job>, (StatusCode, String)> {
    let Some(job) = state.ctx.queue.remove_by_id(id) else {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("job {id} is not in the queue"),
        ));
    };

    state
        .ctx
        .store
        .delete_job(id)
        .await
        .map_err(|err| (StatusCode::BAD_REQUEST, format!("{err:#}")))?;

    Ok(Json(job))
}

async fn list_workers(State(state): State<ApiState>) -> Json<Vec<WorkerInfo>> {
    Json(state.pool.worker_infos())
}

async fn list_failed(
    State(state): State<ApiState>,
) -> Result<Json<Vec<FailureRecord>>, (StatusCode, String)> {
    let failed = state
        .ctx
        .store
        .failed_jobs()
        .await
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")))?;
    Ok(Json(failed))
}

async fn ws_upgrade(State(state): State<ApiState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| client_session(state, socket))
}

/// Stream hub events to one WebSocket peer.
///
/// The peer gets a ping every `PING_PERIOD`; any inbound frame (pongs
/// included) proves liveness. A peer that stays silent past `PONG_WAIT` or
/// fails a write is disconnected and unregistered. Shutdown force-closes
/// the session: a live, well-behaved peer must not keep the server
/// running past the drain deadline.
async fn client_session(state: ApiState, socket: WebSocket) {
    let cancel = state.pool.cancel_token();
    let mut subscription = state.ctx.hub.subscribe();
    let (mut sink, mut stream) = socket.split();
    let mut ping = tokio::time::interval(PING_PERIOD);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it.
    ping.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            event = subscription.events.recv() => {
                let Some(event) = event else { break };
                let Ok(text) = serde_json::to_string(&event) else { continue };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            inbound = tokio::time::timeout(PONG_WAIT, stream.next()) => {
                match inbound {
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(err))) => {
                        debug!(error = %err, "websocket read error");
                        break;
                    }
                    Err(_) => {
                        warn!("websocket peer failed the liveness deadline");
                        break;
                    }
                }
            }
        }
    }

    state.ctx.hub.unsubscribe(subscription.id);
    debug!("websocket peer disconnected");
}
