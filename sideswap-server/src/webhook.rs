use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::post,
    Router,
};
use sideswap_core::{verify_signature, PushEvent, DELIVERY_HEADER, SIGNATURE_HEADER};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::AppState;

pub const PUSH_PATH: &str = "/_github_push";

/// Reject any request whose body does not match its `X-Hub-Signature`.
async fn verify_webhook_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let delivery = parts
        .headers
        .get(DELIVERY_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("unknown");

    let Some(signature) = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
    else {
        warn!("Webhook delivery {} has no signature", delivery);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    };

    if !verify_signature(&state.webhook_secret, &bytes, signature) {
        error!("Invalid webhook signature on delivery {}", delivery);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(request).await)
}

/// Queue a deployment for pushes to the deploy branch. Always answers
/// immediately; the transition runs on the deploy worker.
pub async fn github_push_handler(State(state): State<Arc<AppState>>, body: Bytes) -> String {
    let push = match PushEvent::from_slice(&body) {
        Ok(push) => push,
        Err(e) => {
            warn!("Ignoring malformed push event: {}", e);
            return "Ignored malformed push event".to_string();
        }
    };

    if !push.targets_branch(&state.deploy_branch) {
        info!("Push to {} does not touch the deploy branch", push.ref_name);
        let snapshot = state.deployer.snapshot();
        let last = snapshot
            .last_revision()
            .map(|r| r.as_str())
            .unwrap_or("none");
        return format!("Unnecessary inform, head {}", last);
    }

    if push.head.trim().is_empty() {
        warn!("Push to {} carries no head revision", push.ref_name);
        return "Ignored push event without a head revision".to_string();
    }

    let revision = push.head_revision();
    info!("Push to {} moved it to {}", push.ref_name, revision.short());

    if let Some(superseded) = state.deploy_queue.request(revision.clone()) {
        info!(
            "Pending deployment of {} superseded by {}",
            superseded.short(),
            revision.short()
        );
    }

    format!("Thanks, updating to {} now", revision)
}

pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(PUSH_PATH, post(github_push_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_webhook_signature,
        ))
}
