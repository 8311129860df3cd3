use actix_web::{App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use risk_intel_engine::app::AppState;
use risk_intel_engine::model::Config;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present (ignore if missing)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().map_err(std::io::Error::other)?;
    let bind_addr = config.bind_addr();

    let state = AppState::new(config).map_err(std::io::Error::other)?;
    let server_state = state.clone();

    tracing::info!("Starting risk intel engine on {}", bind_addr);

    HttpServer::new(move || {
        let state = server_state.clone();
        App::new().configure(move |cfg| state.configure(cfg))
    })
    .bind(&bind_addr)?
    .run()
    .await?;

    state.shutdown().await;
    Ok(())
}
