use anyhow::Context;
use db::DBService;
use server::{AppState, app, config::Config};
use services::services::campaign_dispatcher::CampaignDispatcher;
use tokio::net::TcpListener;
use utils::logging::{init_sentry, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    let _sentry = init_sentry(config.sentry_dsn.as_deref(), &config.environment);
    init_tracing();

    let db = DBService::new(&config.database_url, config.database_max_connections)
        .await
        .context("failed to connect to the database")?;
    let state = AppState::new(db, &config)?;

    if !state.support().is_enabled() {
        tracing::warn!("ANTHROPIC_API_KEY not set, support chat is disabled");
    }

    let dispatcher =
        CampaignDispatcher::spawn(state.campaigns().clone(), config.campaign_poll_interval);

    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(
        %addr,
        email_provider = %config.email_provider,
        "Server listening"
    );

    axum::serve(listener, app(state, &config.cors_origins))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    dispatcher.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
