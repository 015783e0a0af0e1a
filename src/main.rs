//! flowsplit process entry point.
//!
//! Wires the explode/rebuild/watch core together from environment configuration and
//! runs the watch orchestrator until a shutdown signal arrives. This is deliberately
//! thin: argument parsing, a help surface, an exit-code taxonomy, and configuration
//! file loading/validation are all external collaborators — this binary only
//! demonstrates that the core crates compose into a runnable process.

use std::path::PathBuf;

use anyhow::{Context, Result};
use flowsplit_core::FlowsplitConfig;
use flowsplit_plugins::builtin::default_plugins;
use flowsplit_plugins::{PluginHost, PluginSelection};
use flowsplit_remote::Credential;
use flowsplit_watch::{OperatorCommand, WatchOrchestrator};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("flowsplit=info".parse()?),
        )
        .json()
        .init();

    info!("starting flowsplit");

    let base_url = std::env::var("FLOWSPLIT_REMOTE_URL")
        .context("FLOWSPLIT_REMOTE_URL must name the remote document endpoint's base URL")?;
    let tree_root = PathBuf::from(std::env::var("FLOWSPLIT_TREE_ROOT").unwrap_or_else(|_| "./flows".to_string()));
    let document_path =
        PathBuf::from(std::env::var("FLOWSPLIT_DOCUMENT_PATH").unwrap_or_else(|_| "./flows.json".to_string()));
    let credential = credential_from_env();

    let orchestrator =
        WatchOrchestrator::new(base_url, credential, &tree_root, &document_path, FlowsplitConfig::default())
            .context("failed to construct the watch orchestrator")?;

    let host_factory = std::sync::Arc::new(|| PluginHost::new(default_plugins(), &PluginSelection::all()));
    let (handle, join) = orchestrator.run(host_factory);

    info!(tree_root = %tree_root.display(), "flowsplit watch loop running");

    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "unable to listen for shutdown signal");
    } else {
        info!("received shutdown signal, stopping flowsplit");
    }

    let _ = handle.send(OperatorCommand::Quit).await;
    handle.shutdown();
    join.await.context("watch orchestrator task panicked")??;

    info!("flowsplit stopped");
    Ok(())
}

/// Credential *resolution* (reading a token file, prompting interactively) is out of
/// the core's scope; this binary only reads the already-resolved value an external
/// collaborator would otherwise supply.
fn credential_from_env() -> Credential {
    if let Ok(token) = std::env::var("FLOWSPLIT_BEARER_TOKEN") {
        return Credential::Bearer(token);
    }
    if let (Ok(username), Ok(password)) =
        (std::env::var("FLOWSPLIT_BASIC_USER"), std::env::var("FLOWSPLIT_BASIC_PASS"))
    {
        return Credential::Basic { username, password };
    }
    Credential::None
}
