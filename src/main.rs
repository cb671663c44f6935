use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use bytes::Bytes;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tower_http::{cors::CorsLayer, services::ServeDir};

use patchdeck::config::Config;
use patchdeck::downloader::{ArtifactKind, HttpArtifactProvider};
use patchdeck::error::Error;
use patchdeck::index::HttpIndexProvider;
use patchdeck::install::{
    ConfiguredDestinations, DestinationEnumerator, InstallFanout, InstallManager, InstallStatus,
};
use patchdeck::library;
use patchdeck::matcher::SearchMode;
use patchdeck::merger::ResultRecord;
use patchdeck::observer::LogForwarder;
use patchdeck::resolver::RemoteResolver;
use patchdeck::session::{SearchSession, SessionEvents, SessionServices, SessionSnapshot};
use patchdeck::thumbnails::HttpThumbnailProvider;

/// Requests for the coordinator task, which owns the session.
enum Command {
    Search {
        query: String,
        mode: Option<SearchMode>,
        live: bool,
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Refresh(oneshot::Sender<SessionSnapshot>),
    Viewport { start: usize, end: usize },
    Thumbnail {
        id: String,
        reply: oneshot::Sender<Option<Bytes>>,
    },
    Library {
        ids: Vec<String>,
        reply: oneshot::Sender<Vec<ResultRecord>>,
    },
    LibraryChanged,
}

#[derive(Clone)]
struct AppState {
    commands: mpsc::Sender<Command>,
    installs: Arc<InstallManager>,
    destinations: Arc<dyn DestinationEnumerator>,
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    mode: Option<SearchMode>,
    /// Keystroke search: applied after the debounce delay.
    #[serde(default)]
    live: bool,
}

#[derive(Deserialize)]
struct ViewportRequest {
    start: usize,
    end: usize,
}

#[derive(Deserialize)]
struct InstallRequest {
    id: String,
    #[serde(default = "default_kind")]
    kind: ArtifactKind,
}

#[derive(Deserialize)]
struct InstallStatusParams {
    #[serde(default = "default_kind")]
    kind: ArtifactKind,
}

fn default_kind() -> ArtifactKind {
    ArtifactKind::Patch
}

#[derive(Serialize)]
struct ApiResponse {
    success: bool,
    message: String,
}

impl ApiResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }

    fn err(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                success: false,
                message: message.into(),
            }),
        )
    }
}

#[derive(Serialize)]
struct LibraryResponse {
    games: Vec<ResultRecord>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("PatchDeck starting...");

    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load config: {}", e);
        let mut config = Config::default();
        config.apply_env();
        config
    });
    info!("Index server: {}", config.server.index_base_url);
    if config.server.access_token.is_none() {
        warn!("No access token configured. Patch downloads may be refused.");
    }

    let destinations: Arc<dyn DestinationEnumerator> =
        Arc::new(ConfiguredDestinations::from_config(&config));
    for dir in destinations.list_install_directories() {
        info!("Install destination: {}", dir.display());
    }

    let (mut session, events) = SearchSession::new(
        SessionServices {
            index: Arc::new(HttpIndexProvider::new(&config)?),
            resolver: Arc::new(RemoteResolver::from_config(&config)?),
            thumbnails: Arc::new(HttpThumbnailProvider::new(&config)?),
            destinations: destinations.clone(),
            observer: Arc::new(LogForwarder),
        },
        config.search.clone(),
    );
    session.refresh();

    let (commands, rx) = mpsc::channel(64);
    tokio::spawn(run_coordinator(
        session,
        events,
        rx,
        Duration::from_millis(config.search.debounce_ms),
    ));

    let fanout = InstallFanout::from_config(
        &config,
        Arc::new(HttpArtifactProvider::new(&config)?),
        destinations.clone(),
    );

    let state = AppState {
        commands,
        installs: Arc::new(InstallManager::new(Arc::new(fanout))),
        destinations,
    };

    let mut app = Router::new()
        // Search
        .route("/api/search", get(search))
        .route("/api/results", get(get_results))
        .route("/api/refresh", post(refresh))
        .route("/api/viewport", post(set_viewport))
        .route("/api/thumbnails/:id", get(get_thumbnail))
        // Install
        .route("/api/install", post(start_install))
        .route("/api/install/:id", get(get_install_status))
        // Library
        .route("/api/library", get(get_library))
        .route("/api/library/:id", delete(remove_from_library))
        // Health check
        .route("/api/health", get(health_check));

    if let Some(frontend_dir) = &config.server.frontend_dir {
        info!("Frontend directory: {}", frontend_dir.display());
        app = app.nest_service("/", ServeDir::new(frontend_dir));
    }

    let app = app.layer(CorsLayer::permissive()).with_state(state);

    info!("Server running on http://{}", config.server.listen);
    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Single consumer for both HTTP commands and session events.
async fn run_coordinator(
    mut session: SearchSession,
    mut events: SessionEvents,
    mut commands: mpsc::Receiver<Command>,
    debounce: Duration,
) {
    let mut pending: Option<String> = None;
    let deadline = tokio::time::sleep(debounce);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                session.apply(event);
            }
            _ = &mut deadline, if pending.is_some() => {
                if let Some(query) = pending.take() {
                    session.submit_query(&query);
                }
            }
            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    Command::Search { query, mode, live, reply } => {
                        if let Some(mode) = mode {
                            if mode != session.mode() {
                                session.set_mode(mode);
                            }
                        }
                        if live {
                            pending = Some(query);
                            deadline.as_mut().reset(tokio::time::Instant::now() + debounce);
                        } else {
                            pending = None;
                            session.submit_query(&query);
                        }
                        let _ = reply.send(session.snapshot());
                    }
                    Command::Snapshot(reply) => {
                        let _ = reply.send(session.snapshot());
                    }
                    Command::Refresh(reply) => {
                        session.refresh();
                        let _ = reply.send(session.snapshot());
                    }
                    Command::Viewport { start, end } => {
                        session.set_viewport(start..end.max(start));
                    }
                    Command::Thumbnail { id, reply } => {
                        let _ = reply.send(session.thumbnail(&id));
                    }
                    Command::Library { ids, reply } => {
                        let index = session.index().clone();
                        let games = ids
                            .iter()
                            .map(|id| {
                                let name = index.get(id).map(|item| item.name.as_str()).unwrap_or("");
                                ResultRecord::from_index(id, name, &index)
                            })
                            .collect();
                        let _ = reply.send(games);
                    }
                    Command::LibraryChanged => {
                        if session.mode() == SearchMode::Library {
                            let query = session.query().to_string();
                            session.submit_query(&query);
                        }
                    }
                }
            }
        }
    }

    info!("Coordinator stopped");
}

async fn ask<T>(
    state: &AppState,
    build: impl FnOnce(oneshot::Sender<T>) -> Command,
) -> Result<T, StatusCode> {
    let (reply, rx) = oneshot::channel();
    state.commands.send(build(reply)).await.map_err(|_| {
        error!("Coordinator is gone");
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    rx.await.map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

// ─── Search endpoints ───

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SessionSnapshot>, StatusCode> {
    ask(&state, |reply| Command::Search {
        query: params.q,
        mode: params.mode,
        live: params.live,
        reply,
    })
    .await
    .map(Json)
}

async fn get_results(State(state): State<AppState>) -> Result<Json<SessionSnapshot>, StatusCode> {
    ask(&state, Command::Snapshot).await.map(Json)
}

async fn refresh(State(state): State<AppState>) -> Result<Json<SessionSnapshot>, StatusCode> {
    ask(&state, Command::Refresh).await.map(Json)
}

async fn set_viewport(
    State(state): State<AppState>,
    Json(payload): Json<ViewportRequest>,
) -> StatusCode {
    match state
        .commands
        .send(Command::Viewport {
            start: payload.start,
            end: payload.end,
        })
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn get_thumbnail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, StatusCode> {
    match ask(&state, |reply| Command::Thumbnail { id, reply }).await? {
        Some(image) => Ok(([(header::CONTENT_TYPE, "image/jpeg")], image).into_response()),
        None => Err(StatusCode::NOT_FOUND),
    }
}

// ─── Install endpoints ───

async fn start_install(
    State(state): State<AppState>,
    Json(payload): Json<InstallRequest>,
) -> Result<Json<ApiResponse>, (StatusCode, Json<ApiResponse>)> {
    let id = payload.id.trim().to_string();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(ApiResponse::err(StatusCode::BAD_REQUEST, "Invalid game id"));
    }

    match state.installs.start(&id, payload.kind).await {
        Ok(_) => Ok(ApiResponse::ok(format!(
            "Installing {} for {}",
            payload.kind.label(),
            id
        ))),
        Err(e @ Error::AlreadyInstalling(_)) => {
            Err(ApiResponse::err(StatusCode::CONFLICT, e.to_string()))
        }
        Err(e) => {
            error!("Failed to start install of {}: {}", id, e);
            Err(ApiResponse::err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

async fn get_install_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<InstallStatusParams>,
) -> Result<Json<InstallStatus>, StatusCode> {
    state
        .installs
        .status(&id, params.kind)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

// ─── Library endpoints ───

async fn get_library(State(state): State<AppState>) -> Result<Json<LibraryResponse>, StatusCode> {
    let ids = library::installed_ids(&state.destinations.list_install_directories()).await;
    let games = ask(&state, |reply| Command::Library { ids, reply }).await?;
    Ok(Json(LibraryResponse { games }))
}

async fn remove_from_library(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse>, (StatusCode, Json<ApiResponse>)> {
    let dirs = state.destinations.list_install_directories();
    match library::remove_installed(&id, &dirs).await {
        Ok(true) => {
            let _ = state.commands.send(Command::LibraryChanged).await;
            Ok(ApiResponse::ok(format!("Removed {}", id)))
        }
        Ok(false) => Err(ApiResponse::err(StatusCode::NOT_FOUND, "Not installed")),
        Err(e) => {
            error!("Failed to remove {}: {}", id, e);
            Err(ApiResponse::err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = ask(&state, Command::Snapshot).await.ok();
    Json(serde_json::json!({
        "status": if snapshot.is_some() { "ok" } else { "degraded" },
        "index_size": snapshot.map(|s| s.index_size).unwrap_or(0),
    }))
}
