pub mod config;
pub mod github;
pub mod materializer;
pub mod proxy;
pub mod reconciliation;
pub mod redirect;
pub mod state_machine;
pub mod status;
pub mod supervisor;
pub mod test_utils;
pub mod webhook;
pub mod worker;
pub mod workspace;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub use redirect::{RedirectTable, RedirectTarget};
pub use state_machine::{Deployer, DeploymentState, SideLabel, TransitionOutcome};
pub use worker::DeployQueue;

pub struct AppState {
    pub deployer: Arc<Deployer>,
    pub deploy_queue: DeployQueue,
    pub redirect: Arc<RedirectTable>,
    pub proxy_client: reqwest::Client,
    pub webhook_secret: String,
    /// Pushes to any other branch are acknowledged and ignored.
    pub deploy_branch: String,
}

/// The single listener's routes: agent endpoints first, everything else is
/// proxied to the live side.
pub fn front_door_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/_health", get(status::health_check))
        .route("/_status", get(status::status_handler))
        .merge(webhook::webhook_router(state.clone()))
        .fallback(proxy::proxy_handler)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
