use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use evalsync::platform::{ProlificClient, RecruitmentPlatform};
use evalsync::sync::SyncEngine;
use evalsync::{config, db, routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evalsync=info,tower_http=info".into()),
        )
        .init();

    let config = config::Config::from_env()?;
    let config = Arc::new(config);

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    db::run_migrations(pool.as_ref()).await?;

    let platform: Option<Arc<dyn RecruitmentPlatform>> = match &config.prolific_api_token {
        Some(token) => Some(Arc::new(ProlificClient::new(
            &config.prolific_api_url,
            token.clone(),
            config.platform_timeout,
        )?)),
        None => {
            tracing::warn!("PROLIFIC_API_TOKEN not set; platform sync and transitions are disabled");
            None
        }
    };

    let sync = Arc::new(SyncEngine::new(pool.clone(), platform, config.platform_timeout));

    let state = Arc::new(state::AppState {
        pool,
        config: config.clone(),
        sync,
    });

    let app = routes::build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("evalsync listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
