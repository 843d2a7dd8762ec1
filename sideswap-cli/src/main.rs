use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use sideswap_core::{branch_ref, sign_payload, PushEvent, SIGNATURE_HEADER};
use std::fs;
use std::io::Read;
use std::path::PathBuf;

/// Sideswap: operator tool for a running blue-green deploy agent
#[derive(Parser, Debug)]
#[command(name = "sideswap")]
#[command(about = "Operator tool for the sideswap deploy agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the X-Hub-Signature header value for a body
    Sign(SignArgs),
    /// Send a signed push notification to an agent
    Push(PushArgs),
    /// Show which side an agent is serving
    Status(StatusArgs),
}

#[derive(Parser, Debug)]
struct SignArgs {
    /// Shared webhook secret
    #[arg(long, env = "SIDESWAP_WEBHOOK_SECRET", hide_env_values = true)]
    secret: String,

    /// File holding the body (reads stdin if omitted)
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct PushArgs {
    /// Base URL of the agent
    #[arg(long, default_value = "http://localhost:8080")]
    url: String,

    /// Shared webhook secret
    #[arg(long, env = "SIDESWAP_WEBHOOK_SECRET", hide_env_values = true)]
    secret: String,

    /// Revision the branch now points at
    #[arg(long)]
    revision: String,

    /// Branch that moved
    #[arg(long, default_value = "master")]
    branch: String,
}

#[derive(Parser, Debug)]
struct StatusArgs {
    /// Base URL of the agent
    #[arg(long, default_value = "http://localhost:8080")]
    url: String,

    /// Print the JSON form
    #[arg(long)]
    json: bool,
}

fn read_body(file: Option<&PathBuf>) -> Result<Vec<u8>> {
    match file {
        Some(path) => {
            fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
        }
        None => {
            let mut body = Vec::new();
            std::io::stdin()
                .read_to_end(&mut body)
                .context("Failed to read body from stdin")?;
            Ok(body)
        }
    }
}

/// JSON body of a push notification for `branch` moving to `revision`.
fn push_body(branch: &str, revision: &str) -> Result<Vec<u8>> {
    let event = PushEvent::new(branch_ref(branch), revision);
    serde_json::to_vec(&event).context("Failed to encode push event")
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

fn signature_header(secret: &str, body: &[u8]) -> Result<String> {
    sign_payload(secret, body).map_err(|e| anyhow!("Invalid secret: {}", e))
}

fn run_sign(args: SignArgs) -> Result<()> {
    let body = read_body(args.file.as_ref())?;
    println!("{}", signature_header(&args.secret, &body)?);
    Ok(())
}

async fn run_push(client: &reqwest::Client, args: PushArgs) -> Result<()> {
    let body = push_body(&args.branch, &args.revision)?;
    let signature = signature_header(&args.secret, &body)?;
    let url = endpoint(&args.url, "/_github_push");

    let response = client
        .post(&url)
        .header(SIGNATURE_HEADER, signature)
        .header("X-GitHub-Event", "push")
        .header("Content-Type", "application/json")
        .body(body)
        .send()
        .await
        .with_context(|| format!("Failed to send push to {}", url))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .context("Failed to read response body")?;

    if !status.is_success() {
        return Err(anyhow!("Agent rejected push: {} - {}", status, text));
    }

    println!("{}", text.trim_end());
    Ok(())
}

async fn run_status(client: &reqwest::Client, args: StatusArgs) -> Result<()> {
    let url = endpoint(&args.url, "/_status");
    let accept = if args.json {
        "application/json"
    } else {
        "text/plain"
    };

    let response = client
        .get(&url)
        .header("Accept", accept)
        .send()
        .await
        .with_context(|| format!("Failed to fetch {}", url))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .context("Failed to read response body")?;

    if !status.is_success() {
        return Err(anyhow!("Status request failed: {} - {}", status, text));
    }

    if args.json {
        let value: serde_json::Value =
            serde_json::from_str(&text).context("Agent returned invalid JSON")?;
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print!("{}", text);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .context("Failed to create HTTP client")?;

    match cli.command {
        Commands::Sign(args) => run_sign(args),
        Commands::Push(args) => run_push(&client, args).await,
        Commands::Status(args) => run_status(&client, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sideswap_core::verify_signature;

    #[test]
    fn test_push_body_round_trips_through_parser() {
        let body = push_body("master", "abc123").unwrap();

        let event = PushEvent::from_slice(&body).unwrap();

        assert_eq!(event.ref_name, "refs/heads/master");
        assert_eq!(event.head, "abc123");
        assert!(event.targets_branch("master"));
    }

    #[test]
    fn test_signature_verifies_on_the_agent_side() {
        let body = push_body("master", "abc123").unwrap();

        let header = signature_header("s3cret", &body).unwrap();

        assert!(header.starts_with("sha1="));
        assert!(verify_signature("s3cret", &body, &header));
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        assert_eq!(
            endpoint("http://localhost:8080/", "/_status"),
            "http://localhost:8080/_status"
        );
        assert_eq!(
            endpoint("http://agent", "/_github_push"),
            "http://agent/_github_push"
        );
    }

    #[test]
    fn test_read_body_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("body.json");
        fs::write(&path, b"{\"ref\":\"x\"}").unwrap();

        let body = read_body(Some(&path)).unwrap();

        assert_eq!(body, b"{\"ref\":\"x\"}");
    }

    #[test]
    fn test_cli_parses_push() {
        let cli = Cli::try_parse_from([
            "sideswap",
            "push",
            "--secret",
            "s",
            "--revision",
            "abc",
            "--branch",
            "main",
        ])
        .unwrap();

        match cli.command {
            Commands::Push(args) => {
                assert_eq!(args.url, "http://localhost:8080");
                assert_eq!(args.branch, "main");
                assert_eq!(args.revision, "abc");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
