use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use human_art_studio::{
    config::Config,
    gallery::GalleryStore,
    generation::GenerationClient,
    replicate::ReplicateClient,
    studio::Studio,
    web_pages,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "human_art_studio=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    if config.replicate_api_token.is_empty() {
        warn!("REPLICATE_API_TOKEN is not set, generation requests will fail");
    }
    tokio::fs::create_dir_all(&config.generated_dir).await?;
    tokio::fs::create_dir_all(&config.uploaded_dir).await?;

    let replicate = ReplicateClient::new(config.replicate_api_token.clone())
        .with_api_root(config.replicate_api_root.clone())
        .with_model_version(config.replicate_model_version.clone())
        .with_poll_interval(config.poll_interval);
    let studio = Arc::new(Studio::new(
        GalleryStore::new(config.uploaded_dir.clone(), "/uploaded"),
        GalleryStore::new(config.generated_dir.clone(), "/generated"),
        GenerationClient::new(Arc::new(replicate)),
    ));

    let bind_address = config.bind_address();
    let tcp_listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(
        generated_dir = %config.generated_dir.display(),
        uploaded_dir = %config.uploaded_dir.display(),
        "Human Art AI started at http://{bind_address}"
    );

    axum::serve(tcp_listener, web_pages::router(studio))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
