use axum::http::Method;
use spaces::{AppState, config::Config, db::Store, live::LiveUpdates, registry::SessionRegistry};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::SameSite};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::days(7)));

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .allow_origin(Any);

    let store = Store::connect(&config.database_url).await?;
    let registry = SessionRegistry::new();
    let shutdown = CancellationToken::new();
    let live = LiveUpdates::new(store.clone(), registry.clone(), config.live.clone(), shutdown.clone());

    let app_state = AppState {
        store,
        registry,
        live: live.clone(),
        config: config.clone(),
    };

    let app = spaces::router(&config.api_version)
        .with_state(app_state)
        .layer(session_layer)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.addr()).await?;
    info!(addr = %config.addr(), api_version = %config.api_version, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %err, "could not listen for ctrl-c");
                }
                info!("shutting down, draining live sessions");
                shutdown.cancel();
            }
        })
        .await?;

    live.tracker().close();
    live.tracker().wait().await;
    info!("bye");

    Ok(())
}
