use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use reelgrab_core::{
    load_reelgrab_config, HarvestError, Harvester, ReelgrabConfig, RetentionSweeper, UploadRelay,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] reelgrab_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("startup error: {0}")]
    Startup(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Reel harvesting daemon", long_about = None)]
pub struct Cli {
    /// Path to the main configuration file
    #[arg(long, default_value = "configs/reelgrab.toml")]
    pub config: PathBuf,
    /// Run the browser with a visible window, overriding the config
    #[arg(long)]
    pub headed: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub harvester: Arc<Harvester>,
    pub config: Arc<ReelgrabConfig>,
    pub relay: Option<Arc<UploadRelay>>,
}

#[derive(Debug, Deserialize)]
pub struct ReelRequest {
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReelResponse {
    pub video_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_error: Option<String>,
}

/// HTTP-facing error with a JSON body.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl HttpError {
    fn status(&self) -> StatusCode {
        match self {
            HttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HttpError::NotFound(_) => StatusCode::NOT_FOUND,
            HttpError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<HarvestError> for HttpError {
    fn from(err: HarvestError) -> Self {
        match &err {
            HarvestError::NoMediaFound => HttpError::NotFound(err.to_string()),
            _ if err.is_client_error() => HttpError::BadRequest(err.to_string()),
            _ => {
                error!(error = %err, "Harvest failed");
                HttpError::Internal("processing failed".to_string())
            }
        }
    }
}

async fn harvest_reel(
    State(state): State<AppState>,
    Json(request): Json<ReelRequest>,
) -> std::result::Result<Json<ReelResponse>, HttpError> {
    info!(url = %request.url, "Reel requested");
    let artifact = state.harvester.harvest(&request.url).await?;

    let mut relay_error = None;
    if let (Some(relay), Some(description)) = (&state.relay, &request.description) {
        if let Err(err) = relay.upload(&artifact, description).await {
            warn!(error = %err, id = %artifact.id, "Relay upload failed");
            relay_error = Some(err.to_string());
        }
    }

    let base = state.config.server.public_base_url.trim_end_matches('/');
    Ok(Json(ReelResponse {
        video_url: format!("{base}/videos/{}", artifact.file_name()),
        relay_error,
    }))
}

pub fn router(state: AppState) -> Router {
    let videos = ServeDir::new(state.config.output_dir());
    Router::new()
        .route("/api/reel", post(harvest_reel))
        .nest_service("/videos", videos)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut config = load_reelgrab_config(&cli.config)?;
    if cli.headed {
        config.browser.headless = false;
    }
    let config = Arc::new(config);

    let harvester = Harvester::new((*config).clone())
        .map_err(|err| AppError::Startup(format!("harvester init: {err}")))?;
    let relay = match &config.relay {
        Some(section) if section.enabled => Some(Arc::new(
            UploadRelay::new(section.clone())
                .map_err(|err| AppError::Startup(format!("relay init: {err}")))?,
        )),
        _ => None,
    };

    RetentionSweeper::new(config.output_dir(), &config.retention).spawn();

    let state = AppState {
        harvester: Arc::new(harvester),
        config: config.clone(),
        relay,
    };
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr, "reelgrabd listening");
    axum::serve(listener, app).await?;
    Ok(())
}
