use crate::core::DaemonEvent;
use crate::session::Session;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use jukebox_proto::protocol::{Command, SessionSnapshot, TrackInfo};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    session: Arc<Session>,
    event_tx: mpsc::Sender<DaemonEvent>,
}

#[derive(Serialize)]
struct PlaylistEntry {
    position: usize,
    title: String,
    artist: String,
    playing: bool,
}

#[derive(Deserialize)]
struct SkipParams {
    arg: Option<String>,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    session: Arc<Session>,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(HttpState { session, event_tx });

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/playlist", get(get_playlist))
        .route("/api/front", get(get_front))
        .route("/api/skip", post(skip))
        .route("/api/leave", post(leave))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn get_state(State(state): State<HttpState>) -> Json<SessionSnapshot> {
    Json(state.session.snapshot().await)
}

async fn get_playlist(State(state): State<HttpState>) -> Json<Vec<PlaylistEntry>> {
    let snapshot = state.session.snapshot().await;
    let playing = snapshot.now_playing.is_some();
    let entries = snapshot
        .now_playing
        .into_iter()
        .chain(snapshot.upcoming)
        .enumerate()
        .map(|(i, TrackInfo { title, artist })| PlaylistEntry {
            position: i + 1,
            title,
            artist,
            playing: playing && i == 0,
        })
        .collect();
    Json(entries)
}

/// Position 1 of the playlist, `null` when the queue is empty.
async fn get_front(State(state): State<HttpState>) -> Json<Option<TrackInfo>> {
    Json(state.session.queue().peek_front().await.map(|t| t.info()))
}

async fn skip(State(state): State<HttpState>, Query(params): Query<SkipParams>) -> StatusCode {
    info!("HTTP API: Skip {:?}", params.arg);
    forward(&state, Command::Skip { arg: params.arg }).await
}

async fn leave(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Leave");
    forward(&state, Command::Leave).await
}

async fn forward(state: &HttpState, cmd: Command) -> StatusCode {
    if state
        .event_tx
        .send(DaemonEvent::ClientCommand(cmd))
        .await
        .is_err()
    {
        error!("Failed to forward HTTP command");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::ACCEPTED
}
