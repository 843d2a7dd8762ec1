use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use sideswap_core::Revision;
use tracing::{error, info};

const GITHUB_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("sideswap/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct GitHubClient {
    client: Client,
    api_base: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
}

impl GitHubClient {
    pub fn new(token: Option<String>) -> Result<Self> {
        Self::with_api_base(GITHUB_API_BASE, token)
    }

    /// Point at a different API root (GitHub Enterprise, or a test server).
    pub fn with_api_base(api_base: impl Into<String>, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build GitHub HTTP client")?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// The commit `branch` currently points at in `repo` (`owner/name`).
    pub async fn head_commit(&self, repo: &str, branch: &str) -> Result<Revision> {
        let url = format!("{}/repos/{}/commits/{}", self.api_base, repo, branch);

        info!("Fetching head of {} on {}", branch, repo);

        let mut request_builder = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github.v3+json");
        if let Some(token) = &self.token {
            request_builder = request_builder.header("Authorization", format!("Bearer {}", token));
        }

        let response = request_builder
            .send()
            .await
            .context("Failed to send commit request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!("GitHub commit request failed: {} - {}", status, error_text);
            return Err(anyhow!(
                "GitHub commit request failed: {} - {}",
                status,
                error_text
            ));
        }

        let commit: CommitResponse = response
            .json()
            .await
            .context("Failed to parse commit response")?;

        if commit.sha.is_empty() {
            return Err(anyhow!("GitHub returned an empty commit sha"));
        }

        Ok(Revision::from(commit.sha))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn commit_handler(
        Path((owner, name, branch)): Path<(String, String, String)>,
        headers: HeaderMap,
    ) -> Result<Json<Value>, StatusCode> {
        if headers.get("authorization").is_none() {
            return Err(StatusCode::UNAUTHORIZED);
        }
        match (owner.as_str(), name.as_str(), branch.as_str()) {
            ("octo", "app", "master") => Ok(Json(json!({
                "sha": "0123456789abcdef0123456789abcdef01234567",
                "commit": { "message": "ignored" }
            }))),
            _ => Err(StatusCode::NOT_FOUND),
        }
    }

    async fn serve() -> String {
        let app = Router::new().route("/repos/{owner}/{name}/commits/{branch}", get(commit_handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", address)
    }

    #[tokio::test]
    async fn test_head_commit() {
        let base = serve().await;
        let client = GitHubClient::with_api_base(base, Some("t0ken".to_string())).unwrap();

        let head = client.head_commit("octo/app", "master").await.unwrap();

        assert_eq!(head.as_str(), "0123456789abcdef0123456789abcdef01234567");
    }

    #[tokio::test]
    async fn test_head_commit_unknown_branch_fails() {
        let base = serve().await;
        let client = GitHubClient::with_api_base(base, Some("t0ken".to_string())).unwrap();

        let err = client.head_commit("octo/app", "nope").await.unwrap_err();

        assert!(err.to_string().contains("404"), "error was: {}", err);
    }

    #[tokio::test]
    async fn test_no_token_sends_no_authorization() {
        let base = serve().await;
        let client = GitHubClient::with_api_base(base, None).unwrap();

        let err = client.head_commit("octo/app", "master").await.unwrap_err();

        assert!(err.to_string().contains("401"), "error was: {}", err);
    }
}
