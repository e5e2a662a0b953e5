mod catalog;
mod config;
mod db;
mod entities;
mod error;
mod listing;
mod media;
mod models;
mod news;
mod routes;
mod taxonomy;

use std::sync::Arc;

use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{catalog::Catalog, config::Config, media::PosterStore};

pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: Catalog,
    pub posters: PosterStore,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,moviebo=debug,sqlx=warn".to_string()),
        )
        .init();

    let config = Arc::new(Config::from_env()?);

    let db = db::connect_and_migrate(&config.database_url).await?;
    let catalog = Catalog::new(db, config.page_size);
    let posters = PosterStore::new(config.media_root.clone(), config.max_upload_bytes);
    tracing::info!(media_root = %posters.root().display(), "poster store ready");

    let state = Arc::new(AppState { config: config.clone(), catalog, posters });

    let app = routes::router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    tracing::info!(addr = %config.addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
