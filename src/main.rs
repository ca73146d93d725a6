use std::time::Duration;

use tokio_util::sync::CancellationToken;

mod admin;
mod app;
mod audit;
mod auth;
mod clock;
mod config;
mod error;
mod mail;
mod security;
mod state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "tunetudo=debug,security=info,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let (app_state, db) = state::AppState::init().await?;

    // Run migrations if present
    if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
        tracing::warn!(error = %e, "migration failed; continuing");
    }

    let cancel = CancellationToken::new();
    let sweep_secs = app_state.config.reset.sweep_interval_secs;
    let sweeper = (sweep_secs > 0).then(|| {
        auth::reset::spawn_sweeper(
            app_state.resets.clone(),
            Duration::from_secs(sweep_secs),
            cancel.clone(),
        )
    });

    let app = app::build_app(app_state);
    let shutdown = {
        let cancel = cancel.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown signal received");
            cancel.cancel();
        }
    };
    app::serve(app, shutdown).await?;

    cancel.cancel();
    if let Some(handle) = sweeper {
        let _ = handle.await;
    }
    Ok(())
}
