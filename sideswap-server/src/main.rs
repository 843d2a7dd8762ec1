use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tracing::{error, info, warn, Level};

use sideswap_server::config::Config;
use sideswap_server::github::GitHubClient;
use sideswap_server::materializer::GitMaterializer;
use sideswap_server::proxy::proxy_client;
use sideswap_server::reconciliation::{reconcile_on_startup, GitHubRevisionSource};
use sideswap_server::state_machine::{Deployer, InterpreterContext};
use sideswap_server::supervisor::LocalSupervisor;
use sideswap_server::worker::{deploy_loop, DeployQueue};
use sideswap_server::workspace::{SideLayout, SIDE_HOST};
use sideswap_server::{front_door_router, AppState, RedirectTable};

fn init_logging(log_path: Option<&Path>) -> Result<()> {
    match log_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_max_level(Level::INFO)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => tracing_subscriber::fmt().with_max_level(Level::INFO).init(),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config =
        Config::from_env().context("Failed to load configuration from environment variables")?;

    init_logging(config.log_path.as_deref())?;

    info!(
        "Starting sideswap {} for {} ({})",
        sideswap_core::get_version(),
        config.repo,
        config.deploy_branch
    );

    let redirect = Arc::new(RedirectTable::new());
    let layout = SideLayout::new(&config.work_root, &config.binary_name, config.base_port);

    let deployer = Arc::new(Deployer::new(InterpreterContext {
        materializer: Arc::new(GitMaterializer::new(
            GitMaterializer::github_url(&config.repo),
            config.build_command.clone(),
            config.command_timeout,
        )),
        supervisor: Arc::new(LocalSupervisor::new(
            config.artifact_path.clone(),
            config.port_flag.clone(),
            SIDE_HOST,
        )),
        redirect: redirect.clone(),
        layout,
        readiness_timeout: config.readiness_timeout,
    }));

    let github_client = GitHubClient::new(config.github_token.clone())?;
    let revision_source =
        GitHubRevisionSource::new(github_client, &config.repo, &config.deploy_branch);

    // Nothing to serve until the first deployment is live
    let (side, revision) = reconcile_on_startup(&deployer, &revision_source).await?;
    info!("Serving {} from side {}", revision.short(), side);

    let deploy_queue = DeployQueue::new();
    tokio::spawn(deploy_loop(deployer.clone(), deploy_queue.clone()));

    let app_state = Arc::new(AppState {
        deployer: deployer.clone(),
        deploy_queue,
        redirect,
        proxy_client: proxy_client()?,
        webhook_secret: config.webhook_secret.clone(),
        deploy_branch: config.deploy_branch.clone(),
    });

    let app = front_door_router(app_state);

    let listener = TcpListener::bind(&config.listen_address)
        .await
        .with_context(|| format!("Failed to listen on {}", config.listen_address))?;
    info!("Front door listening on {}", config.listen_address);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Shutting down");
    if let Err(e) = deployer.remove_active_directory().await {
        warn!("Failed to clean up active side: {:#}", e);
    }

    Ok(())
}
