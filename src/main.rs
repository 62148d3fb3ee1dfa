mod api;
mod auth;
mod config;
mod engine;
mod extractor;
mod proxy;
mod scanner;
mod session;
mod stealth;

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use dotenv::dotenv;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::proxy::ProxyManager;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::scrap_ad_library,
        api::scrap_profile_page,
        api::health_check,
        api::proxy_stats,
        api::proxy_test
    ),
    components(
        schemas(
            engine::ScrapeReport,
            engine::IterationOutcome,
            engine::TransparencyRecord,
            engine::ProfileReport,
            crate::extractor::ExtractionResult,
            crate::scanner::ClickResult,
            crate::scanner::FirstMatchClick,
            crate::proxy::ProxyStats
        )
    ),
    tags(
        (name = "scrape", description = "Ad transparency scraping"),
        (name = "service", description = "Service health and diagnostics")
    )
)]
struct ApiDoc;

/// Keep the proxy pool fresh in the background until shutdown.
async fn proxy_refresher(proxies: Arc<ProxyManager>, shutdown: CancellationToken) {
    let client = match reqwest::Client::builder()
        .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36")
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!("Proxy refresher disabled, client build failed: {}", e);
            return;
        }
    };

    loop {
        if proxies.needs_refresh() {
            if let Err(e) = proxies.refresh(&client).await {
                tracing::warn!("Proxy refresh failed: {}", e);
            }
        }
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(60)) => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    if config.api_token.is_empty() {
        tracing::warn!("⚠️ SCRAP_API_TOKEN is not set; all scrape requests will be rejected");
    }

    let proxies = Arc::new(ProxyManager::from_env());
    if proxies.has_proxies() {
        info!("📡 Proxy pool active with {} entries", proxies.stats().total_proxies);
    }
    let shutdown = CancellationToken::new();
    tokio::spawn(proxy_refresher(proxies.clone(), shutdown.clone()));

    let state = Arc::new(api::AppState {
        config: config.clone(),
        proxies,
        shutdown: shutdown.clone(),
    });

    let app = Router::new()
        .merge(SwaggerUi::new("/scrap-swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/scrap", get(api::scrap_ad_library))
        .route("/scrap/lkd", get(api::scrap_profile_page))
        .route("/health-check", get(api::health_check))
        .route("/proxies/stats", get(api::proxy_stats))
        .route("/proxies/test", get(api::proxy_test))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!("Listening on {}", listener.local_addr()?);

    // Scrapes run for tens of minutes; the only thing that interrupts them is
    // a shutdown signal, which cancels every in-flight session cleanly.
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received, cancelling in-flight scrapes");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
