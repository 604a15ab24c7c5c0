//! Web API for the sync indicator
//!
//! Provides HTTP endpoints for listing and driving transfers, and a WebSocket
//! streaming every added/changed/removed event.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use crate::dispatcher::{Command, Reply};
use crate::error::{BridgeError, Result};
use crate::registry::ModelEvent;
use crate::transfer::{Transfer, TransferId};

/// Capacity of the event fan-out to WebSocket clients
pub const UPDATE_CHANNEL: usize = 100;

/// Web server state shared across handlers
#[derive(Clone)]
pub struct WebState {
    /// Command channel into the bridge task
    pub commands: mpsc::UnboundedSender<Command>,
    /// Broadcast of registry events (WebSocket subscribers)
    pub updates_tx: broadcast::Sender<ModelEvent>,
}

impl WebState {
    pub fn new(commands: mpsc::UnboundedSender<Command>) -> Self {
        let (updates_tx, _) = broadcast::channel(UPDATE_CHANNEL);
        Self { commands, updates_tx }
    }

    /// Send a command to the bridge and wait for its reply.
    pub async fn request<T, F>(&self, build: F) -> Result<T>
    where
        F: FnOnce(Reply<T>) -> Command,
    {
        let (command, reply) = Command::with_reply(build);
        self.commands.send(command).map_err(|_| BridgeError::BridgeStopped)?;
        reply.await.map_err(|_| BridgeError::BridgeStopped)?
    }
}

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Status code a failed command maps to
fn status_for(error: &BridgeError) -> StatusCode {
    match error {
        BridgeError::UnknownEntity(_) => StatusCode::NOT_FOUND,
        BridgeError::NotStartable(_) | BridgeError::NoLaunchTarget(_) => StatusCode::CONFLICT,
        BridgeError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        BridgeError::NotConnected | BridgeError::BridgeStopped => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn respond<T: Serialize>(result: Result<T>) -> (StatusCode, Json<ApiResponse<T>>) {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::ok(data))),
        Err(e) => (status_for(&e), Json(ApiResponse::err(e.to_string()))),
    }
}

/// Create the web server router
pub fn create_router(state: WebState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/transfers", get(list_transfers))
        .route("/api/transfers/:id/open", post(open_transfer))
        .route("/api/transfers/:id/start", post(start_transfer))
        .route("/api/transfers/:id/cancel", post(cancel_transfer))
        .route("/api/transfers/:id/pause", post(pause_transfer))
        .route("/api/transfers/:id/resume", post(resume_transfer))
        .route("/api/connect", post(connect))
        .route("/api/disconnect", post(disconnect))
        .route("/ws", get(ws_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn bridge_status(state: &WebState) -> Result<serde_json::Value> {
    let connected = state.request(|reply| Command::Connected { reply }).await?;
    let transfers = state.request(|reply| Command::List { reply }).await?;
    Ok(serde_json::json!({
        "connected": connected,
        "transfer_count": transfers.len(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Connection state and transfer count
async fn get_status(State(state): State<WebState>) -> impl IntoResponse {
    respond(bridge_status(&state).await)
}

async fn list_transfers(State(state): State<WebState>) -> impl IntoResponse {
    respond(state.request(|reply| Command::List { reply }).await)
}

async fn open_transfer(
    State(state): State<WebState>,
    Path(id): Path<TransferId>,
) -> impl IntoResponse {
    respond(state.request(|reply| Command::Open { id, reply }).await)
}

async fn start_transfer(
    State(state): State<WebState>,
    Path(id): Path<TransferId>,
) -> impl IntoResponse {
    respond(state.request(|reply| Command::Start { id, reply }).await)
}

async fn cancel_transfer(
    State(state): State<WebState>,
    Path(id): Path<TransferId>,
) -> impl IntoResponse {
    respond(state.request(|reply| Command::Cancel { id, reply }).await)
}

async fn pause_transfer(
    State(state): State<WebState>,
    Path(id): Path<TransferId>,
) -> impl IntoResponse {
    respond(state.request(|reply| Command::Pause { id, reply }).await)
}

async fn resume_transfer(
    State(state): State<WebState>,
    Path(id): Path<TransferId>,
) -> impl IntoResponse {
    respond(state.request(|reply| Command::Resume { id, reply }).await)
}

async fn connect(State(state): State<WebState>) -> impl IntoResponse {
    respond(state.request(|reply| Command::Connect { reply }).await)
}

async fn disconnect(State(state): State<WebState>) -> impl IntoResponse {
    respond(state.request(|reply| Command::Disconnect { reply }).await)
}

/// WebSocket handler for real-time updates
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WebState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// First frame sent to a WebSocket client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename = "initial")]
struct InitialFrame {
    connected: bool,
    transfers: Vec<Transfer>,
}

async fn handle_websocket(socket: WebSocket, state: WebState) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so nothing falls between the two
    let mut updates_rx = state.updates_tx.subscribe();

    let initial = InitialFrame {
        connected: state
            .request(|reply| Command::Connected { reply })
            .await
            .unwrap_or(false),
        transfers: state
            .request(|reply| Command::List { reply })
            .await
            .unwrap_or_default(),
    };
    let json = serde_json::to_string(&initial).unwrap_or_default();
    if sender.send(Message::Text(json)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            update = updates_rx.recv() => match update {
                Ok(event) => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("WebSocket client lagged by {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            Some(msg) = receiver.next() => {
                match msg {
                    Ok(Message::Close(_)) => break,
                    Ok(Message::Ping(data)) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    Err(_) => break,
                    _ => {}
                }
            }
            else => break,
        }
    }
}

/// Serve the API until the listener fails
pub async fn start_web_server(state: WebState, port: u16) -> std::io::Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Web server started on http://0.0.0.0:{}", port);

    axum::serve(listener, app).await
}
