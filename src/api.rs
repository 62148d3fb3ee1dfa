//! HTTP surface: scrape routes, health check, proxy stats.
//!
//! Every response is the same JSON envelope. Partial scrape success is still
//! a 200 — callers read the report's counts, not the status code. Parameter
//! validation happens before any browser work, and each scrape owns exactly
//! one browser session that is closed on every exit path.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use utoipa::IntoParams;

use crate::auth::ApiToken;
use crate::config::Config;
use crate::engine::{self, ProfileReport, ScrapeReport};
use crate::proxy::{ProxyManager, ProxyStats};
use crate::session::{BrowserSession, PageDriver, SessionOptions};

/// Shared service state, one per process.
pub struct AppState {
    pub config: Config,
    pub proxies: Arc<ProxyManager>,
    /// Cancelled on shutdown; every in-flight scrape aborts at its next
    /// suspension point and tears its browser down.
    pub shutdown: CancellationToken,
}

/// Uniform response envelope.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResponse<T> {
    pub success: bool,
    pub message: String,
    pub status_code: u16,
    pub response_object: Option<T>,
}

impl<T: Serialize> ServiceResponse<T> {
    pub fn ok(message: &str, object: T) -> Self {
        Self {
            success: true,
            message: message.to_string(),
            status_code: StatusCode::OK.as_u16(),
            response_object: Some(object),
        }
    }

    pub fn failure(message: &str, status: StatusCode) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            status_code: status.as_u16(),
            response_object: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ServiceResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct AdScrapeParams {
    /// Ad library page id to scrape.
    pub page_id: Option<String>,
    /// Alternative to the Authorization header.
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ProfileScrapeParams {
    /// Absolute URL of the profile page.
    pub page_url: Option<String>,
    /// Alternative to the Authorization header.
    pub token: Option<String>,
}

fn ad_library_url(page_id: &str) -> String {
    format!(
        "https://www.facebook.com/ads/library/?active_status=all&ad_type=all&country=FR\
         &is_targeted_country=false&media_type=all&search_type=page&view_all_page_id={}",
        page_id
    )
}

/// Launch a session, hand it to `work`, and close it no matter how `work`
/// went. The one place browser lifecycles are managed.
async fn with_session<T, F, Fut>(state: &AppState, work: F) -> anyhow::Result<T>
where
    F: FnOnce(Arc<BrowserSession>) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    let proxy = state.proxies.next_proxy();
    let session = Arc::new(BrowserSession::launch(&SessionOptions {
        headless: state.config.headless,
        timezone: state.config.timezone.clone(),
        locale: state.config.browser_locale.clone(),
        proxy: proxy.clone(),
    })?);

    let result = work(session.clone()).await;

    if let Some(proxy) = proxy {
        match &result {
            Ok(_) => state.proxies.mark_success(&proxy.id),
            Err(_) => state.proxies.mark_failure(&proxy.id),
        }
    }
    if let Err(e) = session.close() {
        // Already closed by a crash; the report said so via `aborted`.
        info!("Session close after scrape: {}", e);
    }
    let events = session.events().snapshot();
    info!("📊 Session {} recorded {} diagnostic events", session.id(), events.len());
    result
}

async fn run_ad_scrape(state: &AppState, page_id: &str) -> anyhow::Result<ScrapeReport> {
    let cfg = state.config.engine.clone();
    let cancel = state.shutdown.child_token();
    with_session(state, |session| async move {
        info!("📚 Navigating to ads library...");
        session.navigate(&ad_library_url(page_id))?;

        let wait = cfg.post_navigation_wait.sample();
        info!("⏳ Post-navigation wait: {}ms", wait.as_millis());
        tokio::time::sleep(wait).await;

        if cfg.human.enabled {
            if let Err(e) = session.drift_pointer().await {
                info!("Pointer drift failed: {}", e);
            }
        }

        let report = engine::scrape_ad_library(session.as_ref(), &cfg, &cancel).await?;

        // Keep the warm state observable for future sessions; nothing is
        // persisted here.
        if let Ok(cookies) = session.cookie_names() {
            if !cookies.is_empty() {
                info!("🍪 {} session cookies captured", cookies.len());
            }
        }
        Ok(report)
    })
    .await
}

async fn run_profile_scrape(state: &AppState, page_url: &str) -> anyhow::Result<ProfileReport> {
    let cfg = state.config.engine.clone();
    let cancel = state.shutdown.child_token();
    with_session(state, |session| async move {
        info!("📚 Navigating to profile page...");
        session.navigate(page_url)?;

        let wait_ms = rand::thread_rng().gen_range(1000..2000);
        tokio::time::sleep(std::time::Duration::from_millis(wait_ms)).await;

        engine::scrape_profile_page(session.as_ref(), &cfg, &cancel).await
    })
    .await
}

/// Scrape transparency metadata for every ad of a page.
#[utoipa::path(
    get,
    path = "/scrap",
    tag = "scrape",
    params(AdScrapeParams),
    responses(
        (status = 200, description = "Scrape completed (possibly partial; inspect the counts)", body = ScrapeReport),
        (status = 400, description = "Missing page_id"),
        (status = 401, description = "Missing token"),
        (status = 403, description = "Invalid token"),
        (status = 500, description = "Browser bootstrap failed or scrape threw unrecovered"),
    )
)]
pub async fn scrap_ad_library(
    State(state): State<Arc<AppState>>,
    _token: ApiToken,
    Query(params): Query<AdScrapeParams>,
) -> Response {
    let Some(page_id) = params.page_id.filter(|id| !id.is_empty()) else {
        return ServiceResponse::<ScrapeReport>::failure(
            "Page ID is required",
            StatusCode::BAD_REQUEST,
        )
        .into_response();
    };

    match run_ad_scrape(&state, &page_id).await {
        Ok(report) => ServiceResponse::ok("success", report).into_response(),
        Err(e) => {
            error!("❌ Scrape failed: {:#}", e);
            ServiceResponse::<ScrapeReport>::failure("Error", StatusCode::INTERNAL_SERVER_ERROR)
                .into_response()
        }
    }
}

/// Check a profile page through the same stealth session machinery.
#[utoipa::path(
    get,
    path = "/scrap/lkd",
    tag = "scrape",
    params(ProfileScrapeParams),
    responses(
        (status = 200, description = "Page reached a stable state", body = ProfileReport),
        (status = 400, description = "Missing page_url"),
        (status = 401, description = "Missing token"),
        (status = 403, description = "Invalid token"),
        (status = 500, description = "Browser bootstrap or navigation failed"),
    )
)]
pub async fn scrap_profile_page(
    State(state): State<Arc<AppState>>,
    _token: ApiToken,
    Query(params): Query<ProfileScrapeParams>,
) -> Response {
    let Some(page_url) = params.page_url.filter(|url| !url.is_empty()) else {
        return ServiceResponse::<ProfileReport>::failure(
            "Page URL is required",
            StatusCode::BAD_REQUEST,
        )
        .into_response();
    };

    match run_profile_scrape(&state, &page_url).await {
        Ok(report) => ServiceResponse::ok("success", report).into_response(),
        Err(e) => {
            error!("❌ Profile check failed: {:#}", e);
            ServiceResponse::<ProfileReport>::failure("Error", StatusCode::INTERNAL_SERVER_ERROR)
                .into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/health-check",
    tag = "service",
    responses((status = 200, description = "Service is up"))
)]
pub async fn health_check() -> Response {
    ServiceResponse::ok("Service is healthy", serde_json::json!({})).into_response()
}

/// Aggregate stats over the proxy pool.
#[utoipa::path(
    get,
    path = "/proxies/stats",
    tag = "service",
    responses(
        (status = 200, description = "Pool stats", body = ProxyStats),
        (status = 401, description = "Missing token"),
        (status = 403, description = "Invalid token"),
    )
)]
pub async fn proxy_stats(State(state): State<Arc<AppState>>, _token: ApiToken) -> Response {
    ServiceResponse::ok("success", state.proxies.stats()).into_response()
}

/// Probe every pool entry for connectivity and return the refreshed stats.
/// Slow by nature; meant for operators, not for the scrape path.
#[utoipa::path(
    get,
    path = "/proxies/test",
    tag = "service",
    responses(
        (status = 200, description = "Probe finished, stats reflect results", body = ProxyStats),
        (status = 401, description = "Missing token"),
        (status = 403, description = "Invalid token"),
    )
)]
pub async fn proxy_test(State(state): State<Arc<AppState>>, _token: ApiToken) -> Response {
    let working = state.proxies.test_all(std::time::Duration::from_secs(5)).await;
    info!("🧪 Proxy probe finished: {} working", working);
    ServiceResponse::ok("success", state.proxies.stats()).into_response()
}
