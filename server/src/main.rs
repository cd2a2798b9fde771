use tokio::join;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod connection_manager;
mod database;
mod database_manager;
mod settlement;
mod standings;

use config::StoreConfig;
use connection_manager::handle_listen_server;
use database::DatabaseConnection;
use database_manager::DatabaseManager;
use settlement::SettlementManager;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let store = StoreConfig::from_env();
    let mut database = DatabaseConnection::connect(&config::db_addr())
        .await
        .expect("could not reach the league database");
    // do not care about failure, as the admin could already have been created
    let _ = database.create_user("admin", true, store.starting_balance).await;
    info!(db = %config::db_addr(), "store connected");

    let (db_tx, db_rx) = mpsc::channel(32);
    let mut db_manager = DatabaseManager::new(database, db_rx, store);

    let db_task = tokio::spawn(async move {
        db_manager.manage().await;
    });

    let (settlement_tx, settlement_rx) = mpsc::channel(32);
    let mut settlement_manager = SettlementManager::new(settlement_rx, db_tx.clone());

    let settlement_task = tokio::spawn(async move {
        settlement_manager.manage().await;
    });

    let listen_server_task = tokio::spawn(async move {
        handle_listen_server(config::bind_addr(), db_tx, settlement_tx).await;
    });

    let (res1, res2, res3) = join!(db_task, settlement_task, listen_server_task);
    res1.unwrap();
    res2.unwrap();
    res3.unwrap();
}
