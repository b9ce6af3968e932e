//! HTTP endpoint dispatch.
//!
//! Requests at `/<actor>/<name>` are turned into query futures and settled
//! inside the owning actor's handler loop, so endpoint handlers see the same
//! serial execution as message handlers.

use crate::error::RuntimeError;
use crate::system::ActorSystem;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tracing::info;

pub fn router(system: ActorSystem) -> Router {
    Router::new()
        .route("/:actor/:endpoint", get(dispatch))
        .with_state(system)
}

async fn dispatch(
    State(system): State<ActorSystem>,
    Path((actor, endpoint)): Path<(String, String)>,
) -> Response {
    match system.query(&actor, &endpoint).await {
        Some(reply) => ([(header::CONTENT_TYPE, reply.content_type)], reply.body).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Serves the endpoint router until the task is dropped.
pub async fn serve(system: ActorSystem, host: String, port: u16) -> Result<(), RuntimeError> {
    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
    info!(host, port = listener.local_addr()?.port(), "http endpoints listening");
    axum::serve(listener, router(system))
        .await
        .map_err(RuntimeError::Io)
}
