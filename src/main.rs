use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use matchday_news::assets::{AssetLoader, AssetOptions, AssetRegistry};
use matchday_news::config::Config;
use matchday_news::db::Database;
use matchday_news::fetcher::{start_background_refresh, Fetcher};
use matchday_news::gateway::CategoryGateway;
use matchday_news::remote::{build_client, DiskCache, HttpObjectStorage, ReqwestImageClient};
use matchday_news::routes::{self, AppState};
use matchday_news::state::NewsStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "matchday_news=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load("news.toml")?;
    info!("Loaded {} categories from configuration", config.categories.len());

    // Initialize database
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| config.store.database_url.clone());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    if let Some(seed) = &config.store.seed_file {
        match db.import_seed(seed).await {
            Ok(count) => info!("Imported {} seed documents from {}", count, seed.display()),
            Err(e) => warn!("Skipping seed file {}: {}", seed.display(), e),
        }
    }
    info!("Database initialized");

    let db = Arc::new(db);

    // Image collaborators
    let client = build_client(config.storage.request_timeout_secs)?;
    let storage = Arc::new(HttpObjectStorage::new(client.clone(), &config.storage.base_url)?);
    let http = Arc::new(ReqwestImageClient::new(client));
    let loader = Arc::new(AssetLoader::new(
        storage,
        http,
        DiskCache::new(&config.cache.dir),
        AssetOptions {
            skip_network_on_disk_hit: config.cache.skip_network_on_disk_hit,
            write_back: config.cache.write_back,
        },
    ));
    let assets = Arc::new(AssetRegistry::new(loader));

    // Create fetcher
    let gateway = Arc::new(CategoryGateway::new(
        db.clone(),
        assets.clone(),
        config.news_of_the_day_limit,
        config.category_feed_limit,
    ));
    let store = Arc::new(NewsStore::new(&config.categories[0]));
    let fetcher = Arc::new(Fetcher::new(
        gateway,
        store.clone(),
        config.categories.clone(),
    ));

    // Start background refresh task
    let bg_fetcher = fetcher.clone();
    let refresh_interval = config.refresh_interval;
    tokio::spawn(async move {
        start_background_refresh(bg_fetcher, refresh_interval).await;
    });

    // Create app state
    let state = Arc::new(AppState {
        store,
        fetcher,
        assets,
        labels: config.labels.clone(),
    });

    // Build router
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    // Start server
    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
    info!("Server starting on http://localhost:3000");

    axum::serve(listener, app).await?;

    Ok(())
}
