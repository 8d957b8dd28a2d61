//! Storyboard hub server.
//!
//! Configuration comes from the environment (see `ServerConfig::from_env`);
//! `RUST_LOG` controls log output and defaults to `info`.

use log::info;
use std::error::Error;
use std::sync::Arc;

use storyboard_collab::{BoardStore, CollabServer, GatewayError, ServerConfig, StoreConfig};

/// Seed an empty store with one user and board so the server is usable
/// straight away.
fn bootstrap(store: &BoardStore) -> Result<(), GatewayError> {
    let user = store.create_user("Demo")?;
    let credential = store.issue_credential(user.id)?;
    let board = store.create_board(user.id, "Demo storyboard")?;
    info!("Bootstrapped demo board {board}");
    info!("Connect to /api/arena/{board} with cookie userId={credential}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from_env();
    let store = match &config.storage_path {
        Some(path) => BoardStore::open(StoreConfig {
            path: path.clone(),
            ..StoreConfig::default()
        })?,
        None => {
            info!("STORAGE_PATH not set; boards live in memory only");
            BoardStore::in_memory()
        }
    };
    if store.board_ids().is_empty() {
        bootstrap(&store)?;
    }

    let server = CollabServer::new(config, Arc::new(store));
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}
