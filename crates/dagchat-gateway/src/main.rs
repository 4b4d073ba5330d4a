use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

mod app;
mod envelope;
mod http;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dagchat_gateway=info,tower_http=debug".into()),
        )
        .init();

    // load config: explicit path > DAGCHAT_CONFIG env > ~/.dagchat/dagchat.toml
    let config_path = std::env::var("DAGCHAT_CONFIG").ok();
    let config = dagchat_core::config::DagchatConfig::load(config_path.as_deref())
        .unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            dagchat_core::config::DagchatConfig::default()
        });

    let metadata_conn = open_db(&config.database.metadata_path)?;
    dagchat_store::db::init_metadata_db(&metadata_conn)?;
    let nodes_conn = open_db(&config.database.nodes_path)?;
    dagchat_store::db::init_nodes_db(&nodes_conn)?;

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState::new(
        config,
        dagchat_store::MetadataStore::new(metadata_conn),
        dagchat_store::NodeStore::new(nodes_conn),
    ));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("DAG-chat gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

fn open_db(path: &str) -> anyhow::Result<rusqlite::Connection> {
    if let Some(parent) = Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(rusqlite::Connection::open(path)?)
}
