mod config;

use std::sync::Arc;

use axum::http::{
    Method,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use medfeed_api::classifier::{Classifier, CommandClassifier, UnavailableClassifier};
use medfeed_api::media::MediaStore;
use medfeed_api::routes::build_router;
use medfeed_api::state::{AppContext, SessionSettings};
use medfeed_db::Database;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "medfeed=debug,medfeed_api=debug,medfeed_db=info,tower_http=debug".into()
            }),
        )
        .init();

    let config = Config::from_env()?;

    let db = Database::open(&config.db_path)?;
    let media = MediaStore::new(config.media_dir.clone())?;

    let classifier: Arc<dyn Classifier> = match config
        .classifier_cmd
        .as_deref()
        .and_then(CommandClassifier::from_command_line)
    {
        Some(cmd) => {
            info!("Classifier command: {}", cmd.program());
            Arc::new(cmd)
        }
        None => {
            warn!("MEDFEED_CLASSIFIER_CMD is unset; x-ray uploads will be rejected");
            Arc::new(UnavailableClassifier)
        }
    };

    let sessions = SessionSettings {
        jwt_secret: config.jwt_secret.clone(),
        ttl: chrono::Duration::hours(config.session_hours),
        remember_ttl: chrono::Duration::days(config.remember_days),
    };
    let ctx = AppContext::new(db, media, classifier, sessions)
        .with_classifier_timeout(config.classifier_timeout)
        .with_max_upload_bytes(config.max_upload_bytes);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    let app = build_router(Arc::new(ctx))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("medfeed listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Could not install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
