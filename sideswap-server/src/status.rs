//! Status types for the status endpoint.
//!
//! Built from the published deployment snapshot, so rendering never waits
//! for a transition in progress.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::state_machine::{DeploymentState, SideLabel, SidePhase};
use crate::workspace::SideLayout;
use crate::AppState;

/// The side a transition is preparing.
#[derive(Debug, Serialize)]
pub struct CandidateStatus {
    pub side: u16,
    pub revision: String,
    pub phase: SidePhase,
}

#[derive(Debug, Serialize)]
pub struct StatusData {
    pub version: String,
    pub state: &'static str,
    pub side: Option<u16>,
    pub head: Option<String>,
    pub dir: Option<String>,
    pub port: Option<u16>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub candidate: Option<CandidateStatus>,
    /// Side being torn down after a swap.
    pub retiring: Option<u16>,
}

impl StatusData {
    pub fn from_state(state: &DeploymentState, layout: &SideLayout, version: String) -> Self {
        let active = state.active();
        let retiring = match state {
            DeploymentState::Retiring { retiring, .. } => Some(retiring.number()),
            _ => None,
        };

        Self {
            version,
            state: state.state_name(),
            side: active.map(|a| a.label.number()),
            head: active.map(|a| a.revision.to_string()),
            dir: active.map(|a| layout.dir(a.label).display().to_string()),
            port: active.map(|a| layout.port(a.label)),
            deployed_at: active.map(|a| a.deployed_at),
            candidate: state.candidate().map(|c| CandidateStatus {
                side: c.label.number(),
                revision: c.revision.to_string(),
                phase: c.phase,
            }),
            retiring,
        }
    }

    /// `key=value` lines. Active side fields are empty before the first
    /// deployment.
    pub fn render_text(&self) -> String {
        let mut text = format!(
            "side={}\nhead={}\ndir={}\nport={}\n",
            display_or_empty(self.side),
            self.head.as_deref().unwrap_or(""),
            self.dir.as_deref().unwrap_or(""),
            display_or_empty(self.port),
        );

        if let Some(candidate) = &self.candidate {
            text.push_str(&format!(
                "candidate={}\ncandidate_head={}\nphase={}\n",
                candidate.side, candidate.revision, candidate.phase
            ));
        }
        if let Some(retiring) = self.retiring {
            text.push_str(&format!("retiring={}\n", retiring));
        }

        text
    }
}

fn display_or_empty<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "sideswap",
        "version": sideswap_core::get_version()
    })))
}

pub async fn status_handler(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.deployer.snapshot();
    let status_data = StatusData::from_state(
        &snapshot,
        state.deployer.layout(),
        sideswap_core::get_version(),
    );

    // Check Accept header for content negotiation
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("text/plain");

    if accept.to_lowercase().contains("application/json") {
        return Json(status_data).into_response();
    }

    // Default to plain text
    status_data.render_text().into_response()
}
