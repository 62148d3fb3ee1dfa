//! The scraping engine: a sequential state machine over one browser page.
//!
//! One scrape owns one session and drives it through scroll loading, candidate
//! scanning and the per-candidate interaction sequence (open detail view →
//! follow transparency link → extract → close). Failures are contained at
//! iteration granularity; only a dead session halts the batch, and that halt
//! is reported through the `aborted` flag rather than an error.

use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::extractor::{self, ExtractionResult};
use crate::scanner::{self, ClickResult, FirstMatchClick, BUTTON_ROLE, LINK_ROLE};
use crate::session::PageDriver;

/// Marker error for caller-requested cancellation. Distinguishable from
/// iteration failures so it always propagates out of the loop.
#[derive(Debug)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scrape cancelled by caller")
    }
}

impl std::error::Error for Cancelled {}

/// Outcome of one attempted candidate. Append-only: exactly one of these per
/// attempted index, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IterationOutcome {
    /// 1-based sequence number.
    pub iteration: u32,
    pub details_clicked: Option<ClickResult>,
    pub transparency_link_result: Option<FirstMatchClick>,
    pub extracted_data: Option<ExtractionResult>,
    pub close_button_result: Option<FirstMatchClick>,
    pub success: bool,
}

impl IterationOutcome {
    fn failed(iteration: u32) -> Self {
        Self {
            iteration,
            details_clicked: None,
            transparency_link_result: None,
            extracted_data: None,
            close_button_result: None,
            success: false,
        }
    }
}

/// One record distilled from a successful extraction.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransparencyRecord {
    pub ad_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ad_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ad_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    pub data: Option<String>,
    pub heading_text: Option<String>,
}

/// The full batch result returned to the caller. Partial success is a normal
/// response; callers inspect the counts, not the HTTP status.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeReport {
    pub max_iterations: u32,
    pub total_buttons_found: u32,
    pub processed_buttons: u32,
    pub click_results: Vec<IterationOutcome>,
    pub successful_clicks: u32,
    pub extracted_transparency_data: Vec<TransparencyRecord>,
    pub total_data_extracted: u32,
    /// True when the session died mid-loop and the batch stopped early.
    pub aborted: bool,
}

/// Result of the lighter profile-page flow.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileReport {
    pub message: String,
}

const STABILITY_PROBE: &str = "JSON.stringify(document.readyState === 'complete' \
     && document.body !== null && document.body.children.length > 0)";

const DOM_ACCESS_PROBE: &str = "JSON.stringify((() => { \
     try { document.querySelectorAll('div'); return true; } catch (err) { return false; } })())";

const SCROLL_TO_BOTTOM: &str = "JSON.stringify((() => { \
     window.scrollTo(0, document.body.scrollHeight); return true; })())";

const MEASURE_HEIGHT: &str = "JSON.stringify(Math.max(\
     (document.body && document.body.scrollHeight) || 0, \
     (document.documentElement && document.documentElement.scrollHeight) || 0))";

const MODAL_CONTENT_PROBE: &str = r#"
JSON.stringify((() => {
    const dialogs = Array.from(document.querySelectorAll('div[role="dialog"]'));
    const first = dialogs[0];
    return {
        dialogs: dialogs.length,
        hasContent: !!(first && first.textContent && first.textContent.trim().length > 0)
    };
})())
"#;

const MODAL_NUDGE: &str = r#"
JSON.stringify((() => {
    const dialog = document.querySelector('div[role="dialog"]');
    if (!dialog) { return false; }
    for (const type of ['focus', 'mouseover', 'mouseenter', 'click']) {
        dialog.dispatchEvent(new Event(type, { bubbles: true }));
    }
    dialog.scrollTop = 10;
    dialog.scrollTop = 0;
    return true;
})())
"#;

/// Sleep that aborts as soon as the caller cancels.
async fn pause(cancel: &CancellationToken, duration: Duration) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(anyhow::Error::new(Cancelled)),
        _ = sleep(duration) => Ok(()),
    }
}

/// Poll the page until the document is complete and the body is populated.
pub async fn wait_until_stable(
    driver: &dyn PageDriver,
    timeout: Duration,
    poll: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let started = Instant::now();
    loop {
        let ready = driver.eval_json(STABILITY_PROBE)?.as_bool().unwrap_or(false);
        if ready {
            return Ok(());
        }
        if started.elapsed() >= timeout {
            bail!("page failed to stabilize within {:?}", timeout);
        }
        pause(cancel, poll).await?;
    }
}

/// Scroll to the bottom until the content height converges or the attempt cap
/// is hit. Script failures end the loop — whatever already loaded is kept.
/// Returns the number of attempts performed.
pub async fn load_all_items(
    driver: &dyn PageDriver,
    cfg: &EngineConfig,
    cancel: &CancellationToken,
) -> Result<u32> {
    let mut previous: u64 = 0;
    let mut attempts: u32 = 0;

    info!("Starting scroll to load list items...");
    while attempts < cfg.max_scroll_attempts {
        if let Err(e) = driver.eval_json(SCROLL_TO_BOTTOM) {
            warn!("Scroll attempt {} failed: {}", attempts + 1, e);
            break;
        }
        pause(cancel, cfg.scroll_settle).await?;

        let height = match driver.eval_json(MEASURE_HEIGHT) {
            Ok(v) => v.as_u64().unwrap_or(0),
            Err(e) => {
                warn!("Height measurement failed: {}", e);
                break;
            }
        };
        debug!("Scroll {}: height {} -> {}", attempts + 1, previous, height);

        // Only growth keeps the loop going; a flat or shrunk page is done.
        if height <= previous {
            info!("No new content loaded, stopping scroll");
            break;
        }
        previous = height;
        attempts += 1;
    }
    info!("Completed scrolling after {} attempts", attempts);
    Ok(attempts)
}

/// A few casual partial scrolls with jittered pauses, to look less like a
/// batch job before the real work starts. Pure policy.
async fn browse_casually(
    driver: &dyn PageDriver,
    cfg: &EngineConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    for pass in 0..cfg.human.browse_passes {
        let factor: f64 = rand::thread_rng().gen_range(0.0..0.3);
        let script = format!(
            "JSON.stringify((() => {{ window.scrollTo(0, document.body.scrollHeight * {:.2}); return true; }})())",
            factor
        );
        if let Err(e) = driver.eval_json(&script) {
            warn!("Browsing pass {} failed: {}", pass + 1, e);
        }
        pause(cancel, cfg.human.browse_pause.sample()).await?;
    }
    Ok(())
}

/// When the freshly opened dialog rendered empty, poke it with benign events
/// to trigger lazy content. Failure here is logged, never fatal.
async fn nudge_empty_modal(
    driver: &dyn PageDriver,
    cancel: &CancellationToken,
) -> Result<()> {
    let probe = match driver.eval_json(MODAL_CONTENT_PROBE) {
        Ok(v) => v,
        Err(e) => {
            warn!("Modal content probe failed: {}", e);
            return Ok(());
        }
    };
    let dialogs = probe.get("dialogs").and_then(|v| v.as_u64()).unwrap_or(0);
    let has_content = probe.get("hasContent").and_then(|v| v.as_bool()).unwrap_or(false);
    if dialogs > 0 && !has_content {
        info!("🔄 Dialog appears empty, nudging content load...");
        if let Err(e) = driver.eval_json(MODAL_NUDGE) {
            warn!("Modal nudge failed: {}", e);
        }
        pause(cancel, Duration::from_millis(1000)).await?;
    }
    Ok(())
}

/// Process one candidate ordinal through the full interaction sequence.
async fn run_iteration(
    driver: &dyn PageDriver,
    cfg: &EngineConfig,
    cancel: &CancellationToken,
    ordinal: usize,
) -> Result<IterationOutcome> {
    let iteration = ordinal as u32 + 1;

    pause(cancel, cfg.iteration_settle.sample()).await?;
    wait_until_stable(driver, cfg.stability_timeout, cfg.stability_poll, cancel).await?;
    let dom_ok = driver.eval_json(DOM_ACCESS_PROBE)?.as_bool().unwrap_or(false);
    if !dom_ok {
        bail!("cannot access DOM");
    }

    // Primary click: re-resolved by ordinal against a fresh scan. A vanished
    // index is a soft failure, not an error.
    let details_clicked =
        scanner::click_at(driver, BUTTON_ROLE, &cfg.locale.details_button, ordinal)?;
    let Some(details_clicked) = details_clicked else {
        debug!("Iteration {}: candidate {} no longer resolves", iteration, ordinal);
        return Ok(IterationOutcome::failed(iteration));
    };

    pause(cancel, cfg.human.modal_delay.sample()).await?;
    if cfg.human.enabled {
        if let Err(e) = driver.eval_json(&crate::stealth::modal_interaction_script()) {
            debug!("Modal interaction simulation failed: {}", e);
        }
    }
    nudge_empty_modal(driver, cancel).await?;

    let link = scanner::click_first(driver, LINK_ROLE, &cfg.locale.transparency_link)?;

    let mut extracted_data = None;
    if link.found {
        pause(cancel, cfg.link_settle).await?;
        wait_until_stable(driver, cfg.stability_timeout, cfg.stability_poll, cancel).await?;
        extracted_data = Some(extractor::extract_transparency_fields(driver, &cfg.locale)?);
        pause(cancel, cfg.extract_settle).await?;
    } else {
        debug!("Iteration {}: transparency link not found", iteration);
    }

    let close = scanner::click_first(driver, BUTTON_ROLE, &cfg.locale.close_button)?;
    if !close.found {
        debug!("Iteration {}: close control not found", iteration);
    }
    pause(cancel, cfg.post_close_settle).await?;
    wait_until_stable(driver, cfg.stability_timeout, cfg.stability_poll, cancel).await?;

    let success = close.found;
    Ok(IterationOutcome {
        iteration,
        details_clicked: Some(details_clicked),
        transparency_link_result: Some(link),
        extracted_data,
        close_button_result: Some(close),
        success,
    })
}

/// Distill outcomes into the final report. Pure.
pub fn aggregate_report(
    max_iterations: u32,
    total_found: usize,
    outcomes: Vec<IterationOutcome>,
    aborted: bool,
) -> ScrapeReport {
    let records: Vec<TransparencyRecord> = outcomes
        .iter()
        .filter_map(|outcome| {
            let data = outcome.extracted_data.as_ref()?;
            if !data.found {
                return None;
            }
            Some(TransparencyRecord {
                ad_index: outcome.iteration,
                ad_id: data.ad_id.clone(),
                ad_date: data.ad_date.clone(),
                nickname: data.nickname.clone(),
                data: data.data.clone(),
                heading_text: data.heading_text.clone(),
            })
        })
        .collect();

    let successful_clicks = outcomes.iter().filter(|o| o.success).count() as u32;
    ScrapeReport {
        max_iterations,
        total_buttons_found: total_found as u32,
        processed_buttons: outcomes.len() as u32,
        click_results: outcomes,
        successful_clicks,
        total_data_extracted: records.len() as u32,
        extracted_transparency_data: records,
        aborted,
    }
}

/// Drive the full ad-library flow against an already-navigated page.
pub async fn scrape_ad_library(
    driver: &dyn PageDriver,
    cfg: &EngineConfig,
    cancel: &CancellationToken,
) -> Result<ScrapeReport> {
    info!("🔍 Starting scraping logic...");

    wait_until_stable(driver, cfg.stability_timeout, cfg.stability_poll, cancel).await?;
    pause(cancel, cfg.initial_settle).await?;

    if cfg.human.enabled {
        browse_casually(driver, cfg, cancel).await?;
    }

    load_all_items(driver, cfg, cancel).await?;
    wait_until_stable(driver, cfg.stability_timeout, cfg.stability_poll, cancel).await?;

    let candidates =
        scanner::find_all_matching(driver, BUTTON_ROLE, &cfg.locale.details_button)?;
    let total = candidates.len();
    let planned = (cfg.max_iterations as usize).min(total);
    info!("Found {} detail triggers, will process {}", total, planned);

    let mut outcomes: Vec<IterationOutcome> = Vec::with_capacity(planned);
    let mut aborted = false;

    for ordinal in 0..planned {
        if cancel.is_cancelled() {
            return Err(anyhow::Error::new(Cancelled));
        }
        // A dead session is the one batch-fatal condition: stop here and
        // report what we have instead of failing every remaining step.
        if driver.is_closed() {
            warn!("Session closed mid-loop at iteration {}, halting", ordinal + 1);
            aborted = true;
            break;
        }

        info!("Processing trigger {}/{}", ordinal + 1, planned);
        match run_iteration(driver, cfg, cancel, ordinal).await {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) if e.is::<Cancelled>() => return Err(e),
            Err(e) => {
                warn!("Iteration {} failed: {}", ordinal + 1, e);
                outcomes.push(IterationOutcome::failed(ordinal as u32 + 1));
            }
        }
    }

    let report = aggregate_report(cfg.max_iterations, total, outcomes, aborted);
    info!(
        "✅ Scrape finished: {}/{} successful, {} records extracted{}",
        report.successful_clicks,
        report.processed_buttons,
        report.total_data_extracted,
        if report.aborted { " (aborted)" } else { "" }
    );
    Ok(report)
}

/// The lighter profile-page flow: settle, simulate browsing, verify the page
/// reached a stable state.
pub async fn scrape_profile_page(
    driver: &dyn PageDriver,
    cfg: &EngineConfig,
    cancel: &CancellationToken,
) -> Result<ProfileReport> {
    info!("🔍 Starting profile page check...");

    wait_until_stable(driver, cfg.stability_timeout, cfg.stability_poll, cancel).await?;
    pause(cancel, cfg.initial_settle).await?;

    if cfg.human.enabled {
        browse_casually(driver, cfg, cancel).await?;
    }

    wait_until_stable(driver, cfg.stability_timeout, cfg.stability_poll, cancel).await?;
    Ok(ProfileReport { message: "success".to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JitterWindow;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Fields a fake detail view exposes once its transparency link is
    /// followed.
    #[derive(Clone)]
    struct FakeFields {
        heading: String,
        data: String,
        ad_id: Option<String>,
        ad_date: Option<String>,
    }

    /// One fake detail trigger on the fake page.
    #[derive(Clone)]
    struct FakeTrigger {
        label: String,
        transparency_link: Option<String>,
        fields: Option<FakeFields>,
        vanish_on_click: bool,
    }

    impl FakeTrigger {
        fn complete(label: &str) -> Self {
            Self {
                label: label.to_string(),
                transparency_link: Some("European Union transparency".to_string()),
                fields: Some(FakeFields {
                    heading: "Reach".to_string(),
                    data: format!("{} accounts", label),
                    ad_id: Some("730411231".to_string()),
                    ad_date: Some("Started running on 2 Aug 2026".to_string()),
                }),
                vanish_on_click: false,
            }
        }
    }

    #[derive(Default)]
    struct FakePageState {
        triggers: Vec<FakeTrigger>,
        heights: Vec<u64>,
        height_cursor: usize,
        open_trigger: Option<usize>,
        link_followed: bool,
        completed_iterations: usize,
        scan_count: usize,
    }

    /// Scripted page driver: interprets the engine's scripts against an
    /// in-memory DOM model.
    struct FakePage {
        state: Mutex<FakePageState>,
        closed: AtomicBool,
        /// Set when the page dies "between" iterations: the next liveness
        /// probe observes it, the way a crashed renderer is actually noticed.
        pending_close: AtomicBool,
        /// Mark the page closed once this many iterations completed.
        close_after: Option<usize>,
    }

    impl FakePage {
        fn new(triggers: Vec<FakeTrigger>, heights: Vec<u64>) -> Self {
            Self {
                state: Mutex::new(FakePageState {
                    triggers,
                    heights,
                    ..Default::default()
                }),
                closed: AtomicBool::new(false),
                pending_close: AtomicBool::new(false),
                close_after: None,
            }
        }

        fn close_after(mut self, iterations: usize) -> Self {
            self.close_after = Some(iterations);
            self
        }

        fn scan_count(&self) -> usize {
            self.state.lock().unwrap().scan_count
        }

        fn visible_matches(state: &FakePageState) -> Vec<Value> {
            state
                .triggers
                .iter()
                .filter(|t| !t.vanish_on_click)
                .enumerate()
                .map(|(i, t)| json!({ "index": i, "text": t.label.clone() }))
                .collect()
        }
    }

    impl PageDriver for FakePage {
        fn navigate(&self, _url: &str) -> Result<()> {
            Ok(())
        }

        fn eval_json(&self, script: &str) -> Result<Value> {
            if self.closed.load(Ordering::SeqCst) {
                bail!("page is closed");
            }
            let mut state = self.state.lock().unwrap();

            if script.contains("readyState") {
                return Ok(json!(true));
            }
            if script.contains("try { document.querySelectorAll") {
                return Ok(json!(true));
            }
            if script.contains("Math.max") {
                let idx = state.height_cursor.min(state.heights.len().saturating_sub(1));
                let height = state.heights.get(idx).copied().unwrap_or(0);
                state.height_cursor += 1;
                return Ok(json!(height));
            }
            if script.contains("window.scrollTo") {
                return Ok(json!(true));
            }
            if script.contains("hasContent") {
                let open = state.open_trigger.is_some();
                return Ok(json!({ "dialogs": if open { 1 } else { 0 }, "hasContent": open }));
            }
            if script.contains("dispatchEvent") {
                return Ok(json!(true));
            }

            // Scanner scripts: keyed on role selector + variant text.
            let details = script.contains("See ad details");
            let close = script.contains("\"Close\"");
            let link = script.contains("European Union transparency")
                && script.contains("node.click()");
            let extract = script.contains("div[role=\"heading\"]");

            if details && script.contains("const target =") {
                let target: usize = script
                    .split("const target = ")
                    .nth(1)
                    .and_then(|rest| rest.split(';').next())
                    .and_then(|n| n.trim().parse().ok())
                    .unwrap_or(usize::MAX);
                let visible: Vec<usize> = state
                    .triggers
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| !t.vanish_on_click)
                    .map(|(i, _)| i)
                    .collect();
                return match visible.get(target) {
                    Some(&real) => {
                        state.open_trigger = Some(real);
                        state.link_followed = false;
                        Ok(json!({ "found": true, "text": state.triggers[real].label.clone() }))
                    }
                    None => Ok(json!({ "found": false })),
                };
            }
            if details {
                state.scan_count += 1;
                return Ok(json!({ "matches": Self::visible_matches(&state) }));
            }
            if link {
                let followed = state
                    .open_trigger
                    .and_then(|i| state.triggers[i].transparency_link.clone());
                return match followed {
                    Some(text) => {
                        state.link_followed = true;
                        Ok(json!({ "found": true, "text": text }))
                    }
                    None => Ok(json!({ "found": false })),
                };
            }
            if extract {
                let fields = state
                    .open_trigger
                    .filter(|_| state.link_followed)
                    .and_then(|i| state.triggers[i].fields.clone());
                return match fields {
                    Some(f) if script.contains(&f.heading) => Ok(json!({
                        "found": true,
                        "data": f.data,
                        "headingText": f.heading,
                        "adId": f.ad_id,
                        "adDate": f.ad_date,
                        "nickname": null
                    })),
                    Some(f) => Ok(json!({
                        "found": false,
                        "headingsScanned": 1,
                        "headingTexts": [f.heading]
                    })),
                    None => Ok(json!({
                        "found": false,
                        "headingsScanned": 0,
                        "headingTexts": []
                    })),
                };
            }
            if close {
                if state.open_trigger.take().is_some() {
                    state.completed_iterations += 1;
                    if let Some(cap) = self.close_after {
                        if state.completed_iterations >= cap {
                            self.pending_close.store(true, Ordering::SeqCst);
                        }
                    }
                    return Ok(json!({ "found": true, "text": "Close" }));
                }
                return Ok(json!({ "found": false }));
            }

            bail!("fake page got unexpected script: {}", script);
        }

        fn is_closed(&self) -> bool {
            if self.pending_close.load(Ordering::SeqCst) {
                self.closed.store(true, Ordering::SeqCst);
            }
            self.closed.load(Ordering::SeqCst)
        }

        fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fast_config() -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.human.enabled = false;
        cfg.max_scroll_attempts = 10;
        cfg.scroll_settle = Duration::from_millis(1);
        cfg.stability_timeout = Duration::from_millis(100);
        cfg.stability_poll = Duration::from_millis(1);
        cfg.initial_settle = Duration::from_millis(1);
        cfg.post_navigation_wait = JitterWindow::new(1, 2);
        cfg.iteration_settle = JitterWindow::new(1, 2);
        cfg.human.modal_delay = JitterWindow::new(1, 2);
        cfg.link_settle = Duration::from_millis(1);
        cfg.extract_settle = Duration::from_millis(1);
        cfg.post_close_settle = Duration::from_millis(1);
        cfg
    }

    #[tokio::test]
    async fn full_batch_extracts_every_candidate() {
        let page = FakePage::new(
            vec![
                FakeTrigger::complete("ad one"),
                FakeTrigger::complete("ad two"),
                FakeTrigger::complete("ad three"),
            ],
            vec![1000, 1000],
        );
        let cfg = fast_config();
        let cancel = CancellationToken::new();

        let report = scrape_ad_library(&page, &cfg, &cancel).await.unwrap();
        assert_eq!(report.total_buttons_found, 3);
        assert_eq!(report.processed_buttons, 3);
        assert_eq!(report.successful_clicks, 3);
        assert_eq!(report.total_data_extracted, 3);
        assert!(!report.aborted);
        assert_eq!(report.click_results.len(), 3);
        assert_eq!(report.extracted_transparency_data[0].ad_id.as_deref(), Some("730411231"));
    }

    #[tokio::test]
    async fn missing_transparency_link_is_a_soft_miss() {
        let mut no_link = FakeTrigger::complete("linkless ad");
        no_link.transparency_link = None;
        no_link.fields = None;
        let page = FakePage::new(
            vec![FakeTrigger::complete("ad one"), no_link],
            vec![500, 500],
        );
        let cfg = fast_config();
        let cancel = CancellationToken::new();

        let report = scrape_ad_library(&page, &cfg, &cancel).await.unwrap();
        assert_eq!(report.processed_buttons, 2);

        let outcome = &report.click_results[1];
        let link = outcome.transparency_link_result.as_ref().unwrap();
        assert!(!link.found);
        assert!(outcome.extracted_data.is_none());
        // The close control still worked, so the iteration itself counts.
        assert!(outcome.success);
        assert_eq!(report.total_data_extracted, 1);
    }

    #[tokio::test]
    async fn closed_session_halts_batch_without_error() {
        let triggers = (0..5).map(|i| FakeTrigger::complete(&format!("ad {}", i))).collect();
        let page = FakePage::new(triggers, vec![500, 500]).close_after(2);
        let cfg = fast_config();
        let cancel = CancellationToken::new();

        let report = scrape_ad_library(&page, &cfg, &cancel).await.unwrap();
        assert!(report.aborted);
        assert_eq!(report.click_results.len(), 2);
        assert_eq!(report.total_buttons_found, 5);
        assert!(report.click_results.iter().all(|o| o.success));
    }

    #[tokio::test]
    async fn vanished_candidate_yields_failure_outcome_and_loop_continues() {
        // An ordinal past the end of the fresh scan stands in for a candidate
        // the DOM dropped between scan and click.
        let page = FakePage::new(
            vec![FakeTrigger::complete("ad one"), FakeTrigger::complete("ad two")],
            vec![500, 500],
        );
        let cfg = fast_config();
        let cancel = CancellationToken::new();

        let outcome = run_iteration(&page, &cfg, &cancel, 7).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.details_clicked.is_none());
        assert!(outcome.extracted_data.is_none());
    }

    #[tokio::test]
    async fn scanner_is_idempotent_without_dom_mutation() {
        let page = FakePage::new(
            vec![FakeTrigger::complete("ad one"), FakeTrigger::complete("ad two")],
            vec![500],
        );
        let cfg = fast_config();

        let first =
            scanner::find_all_matching(&page, BUTTON_ROLE, &cfg.locale.details_button).unwrap();
        let second =
            scanner::find_all_matching(&page, BUTTON_ROLE, &cfg.locale.details_button).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(page.scan_count(), 2);
    }

    #[tokio::test]
    async fn scroll_loader_converges_before_attempt_cap() {
        let page = FakePage::new(vec![], vec![1000, 2000, 3000, 3000]);
        let cfg = fast_config();
        let cancel = CancellationToken::new();

        let attempts = load_all_items(&page, &cfg, &cancel).await.unwrap();
        // Heights grow twice (1000, 2000, 3000), then flatten: three growth
        // steps recorded, the flat measurement ends the loop.
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn scroll_loader_stops_at_attempt_cap_when_height_keeps_growing() {
        let heights: Vec<u64> = (1..100).map(|i| i * 100).collect();
        let page = FakePage::new(vec![], heights);
        let mut cfg = fast_config();
        cfg.max_scroll_attempts = 4;
        let cancel = CancellationToken::new();

        let attempts = load_all_items(&page, &cfg, &cancel).await.unwrap();
        assert_eq!(attempts, 4);
    }

    #[tokio::test]
    async fn extraction_is_locale_insensitive() {
        for heading in ["Reach", "Couverture"] {
            let mut trigger = FakeTrigger::complete("ad localisé");
            trigger.fields.as_mut().unwrap().heading = heading.to_string();
            let page = FakePage::new(vec![trigger], vec![500, 500]);
            let cfg = fast_config();
            let cancel = CancellationToken::new();

            let report = scrape_ad_library(&page, &cfg, &cancel).await.unwrap();
            assert_eq!(report.total_data_extracted, 1, "heading variant {:?}", heading);
            assert_eq!(
                report.extracted_transparency_data[0].heading_text.as_deref(),
                Some(heading)
            );
        }
    }

    #[tokio::test]
    async fn cancellation_aborts_the_scrape() {
        let triggers = (0..3).map(|i| FakeTrigger::complete(&format!("ad {}", i))).collect();
        let page = FakePage::new(triggers, vec![500, 500]);
        let cfg = fast_config();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = scrape_ad_library(&page, &cfg, &cancel).await.unwrap_err();
        assert!(err.is::<Cancelled>());
    }

    #[test]
    fn aggregate_report_counts_only_found_extractions() {
        let outcomes = vec![
            IterationOutcome {
                iteration: 1,
                details_clicked: Some(ClickResult { text: "a".into(), clicked: true }),
                transparency_link_result: Some(FirstMatchClick { found: true, text: None }),
                extracted_data: Some(ExtractionResult {
                    found: true,
                    data: Some("1,234 accounts".into()),
                    heading_text: Some("Reach".into()),
                    ad_id: Some("42".into()),
                    ad_date: None,
                    nickname: None,
                    headings_scanned: None,
                    heading_texts: None,
                }),
                close_button_result: Some(FirstMatchClick { found: true, text: None }),
                success: true,
            },
            IterationOutcome {
                iteration: 2,
                details_clicked: Some(ClickResult { text: "b".into(), clicked: true }),
                transparency_link_result: Some(FirstMatchClick { found: true, text: None }),
                extracted_data: Some(ExtractionResult {
                    found: false,
                    data: None,
                    heading_text: None,
                    ad_id: None,
                    ad_date: None,
                    nickname: None,
                    headings_scanned: Some(3),
                    heading_texts: Some(vec![]),
                }),
                close_button_result: Some(FirstMatchClick { found: false, text: None }),
                success: false,
            },
            IterationOutcome::failed(3),
        ];

        let report = aggregate_report(10, 3, outcomes, false);
        assert_eq!(report.processed_buttons, 3);
        assert_eq!(report.successful_clicks, 1);
        assert_eq!(report.total_data_extracted, 1);
        assert_eq!(report.extracted_transparency_data[0].ad_index, 1);
        assert_eq!(report.extracted_transparency_data[0].ad_id.as_deref(), Some("42"));
    }

    #[test]
    fn report_serializes_with_wire_names() {
        let report = aggregate_report(10, 0, vec![], false);
        let value = serde_json::to_value(&report).unwrap();
        assert!(value.get("totalButtonsFound").is_some());
        assert!(value.get("successfulClicks").is_some());
        assert!(value.get("extractedTransparencyData").is_some());
        assert_eq!(value.get("aborted"), Some(&json!(false)));
    }
}
