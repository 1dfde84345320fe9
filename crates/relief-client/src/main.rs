//! Relief client binary.
//!
//! Follows the server's event stream, logging each cache invalidation, and
//! drains the local mutation queue whenever the client is online. Stops on
//! SIGINT.

use std::future::Future;
use std::sync::Arc;

use relief_client::config::{self, Config};
use relief_client::{
    spawn_auto_drain, AcknowledgeReplayer, CacheKey, Connectivity, DispatchTable, EventConsumer,
    HttpReplayer, MutationQueue, MutationReplayer, SqliteMutationStore,
};
use relief_db::DbRuntimeSettings;

const DEFAULT_CONFIG_FILE: &str = "relief-client.toml";

/// First non-blank of the command-line argument and `RELIEF_CLIENT_CONFIG_PATH`.
fn config_path() -> String {
    std::env::args()
        .nth(1)
        .into_iter()
        .chain(std::env::var("RELIEF_CLIENT_CONFIG_PATH").ok())
        .find(|path| !path.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string())
}

#[tokio::main]
async fn main() {
    let path = config_path();
    let config = match config::load_config(Some(&path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("relief client: {path}: {e}");
            std::process::exit(2);
        }
    };
    config.logging.init_tracing();
    tracing::info!(%path, "configuration loaded");

    if let Err(e) = run(config).await {
        tracing::error!("relief client stopped: {}", e);
        std::process::exit(1);
    }
    tracing::info!("relief client shut down");
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    // A headless client has no platform network signal and starts online.
    let connectivity = Connectivity::new(true);

    let store = SqliteMutationStore::open(&config.queue.db_path, DbRuntimeSettings::default())?;
    let replayer: Arc<dyn MutationReplayer> = match &config.queue.replay_base_url {
        Some(base_url) => Arc::new(HttpReplayer::new(reqwest::Client::new(), base_url)),
        None => Arc::new(AcknowledgeReplayer),
    };
    let queue = Arc::new(MutationQueue::new(
        Arc::new(store),
        replayer,
        connectivity.clone(),
    ));
    let pending = queue.len().await?;
    let drainer = spawn_auto_drain(Arc::clone(&queue));

    let consumer_config = config.client.consumer_config();
    tracing::info!(
        url = %consumer_config.stream_url,
        channels = ?consumer_config.channels,
        queue_db = %config.queue.db_path,
        pending,
        "starting relief client"
    );

    let handle = EventConsumer::new(
        consumer_config,
        DispatchTable::standard(),
        Arc::new(|key: &CacheKey| tracing::info!(%key, "cache invalidated")),
        connectivity,
    )?
    .spawn();

    until_signalled(tokio::signal::ctrl_c()).await;
    tracing::info!("shutting down");

    handle.join().await;
    drainer.abort();
    Ok(())
}

/// Resolves when `signal` fires. If the handler cannot be installed the
/// client keeps running rather than shutting down at once.
async fn until_signalled(signal: impl Future<Output = std::io::Result<()>>) {
    if let Err(e) = signal.await {
        tracing::warn!("cannot listen for SIGINT, running until killed: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_resolves_shutdown() {
        let signalled = async { std::io::Result::Ok(()) };
        let done = tokio::time::timeout(Duration::from_secs(1), until_signalled(signalled));
        assert!(done.await.is_ok());
    }

    #[tokio::test]
    async fn missing_signal_handler_keeps_running() {
        let failed = async { std::io::Result::<()>::Err(std::io::Error::other("no driver")) };
        let done = tokio::time::timeout(Duration::from_millis(100), until_signalled(failed));
        assert!(done.await.is_err(), "client must not exit when SIGINT cannot be observed");
    }
}
