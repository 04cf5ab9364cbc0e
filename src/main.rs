use std::sync::Arc;

mod app;
mod auth;
mod config;
mod db;
mod state;

use crate::auth::repo::PgIdentityStore;
use crate::config::AppConfig;
use crate::state::AppState;

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "thrivetrack=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    let pool = db::connect(&config).await?;

    if let Err(e) = db::migrate(&pool).await {
        tracing::warn!(error = %e, "migration failed; continuing with existing schema");
    }

    let http = config.http.clone();
    let state = AppState::from_parts(config, Arc::new(PgIdentityStore::new(pool)));
    let app = app::build_app(state)?;

    app::serve(app, &http).await
}
