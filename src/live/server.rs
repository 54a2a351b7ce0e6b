//! Preview page and the long-poll endpoint.

use std::net::SocketAddr;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot},
};

pub const RESULTS_PATH: &str = "/illustrate-results.json";
const PREVIEW_PAGE: &str = include_str!("preview.html");

/// One preview, as served to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preview {
    pub alias: String,
    pub output: String,
}

/// A long-poll request handed to the reactor loop.
pub type Subscribe = oneshot::Sender<Preview>;

#[derive(Clone)]
pub struct AppState {
    subscribe: mpsc::Sender<Subscribe>,
}

pub fn router(subscribe: mpsc::Sender<Subscribe>) -> Router {
    Router::new()
        .route("/", get(index))
        .route(RESULTS_PATH, get(illustrate_results))
        .with_state(AppState { subscribe })
}

pub async fn bind(port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).await
}

async fn index() -> Html<&'static str> {
    Html(PREVIEW_PAGE)
}

/// Holds the request open until the loop publishes the next preview.
async fn illustrate_results(State(st): State<AppState>) -> Result<Json<Preview>, AppError> {
    let (tx, rx) = oneshot::channel();
    st.subscribe.send(tx).await.map_err(|_| AppError::Stopped)?;
    let preview = rx.await.map_err(|_| AppError::Stopped)?;
    Ok(Json(preview))
}

#[derive(Debug)]
pub enum AppError {
    /// The reactor loop is gone.
    Stopped,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::debug!(error = ?self, "long-poll abandoned");
        let body = Json(serde_json::json!({ "error": "preview loop stopped" }));
        (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
    }
}
