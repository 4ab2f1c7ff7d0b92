use jobsearch_backend::{
    app,
    config::{get_config, init_config},
    database::pool::create_pool,
    services::history_service::{ChatStore, MemoryChatStore, PgChatStore},
    AppState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    init_config()?;
    let config = get_config();

    let store: Arc<dyn ChatStore> = match &config.database_url {
        Some(url) => {
            let pool = create_pool(url).await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            Arc::new(PgChatStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, chat history is in-memory only");
            Arc::new(MemoryChatStore::new())
        }
    };

    let app_state = AppState::new(store);

    {
        let sessions = app_state.sessions.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(15)).await;
                let (idled, collected) = sessions.sweep().await;
                if idled + collected > 0 {
                    info!(idled, collected, "session GC pass");
                }
            }
        });
    }

    if !config.scrape_interval.is_zero() {
        let refresh = app_state.refresh.clone();
        let interval = config.scrape_interval;
        tokio::spawn(async move {
            loop {
                if let Err(e) = refresh.run_once().await {
                    tracing::error!(error = ?e, "job refresh worker error");
                }
                tokio::time::sleep(interval).await;
            }
        });
    }

    let router = app(app_state);

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
