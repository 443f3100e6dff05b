pub mod health;
pub mod jobs;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /ws                      WebSocket watch protocol
/// /jobs                    list, submit
/// /jobs/stats              status counts and pool load
/// /jobs/{id}               get
/// /jobs/{id}/cancel        cancel (POST)
/// /jobs/{id}/resubmit      resubmit (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .nest("/jobs", jobs::router())
}
