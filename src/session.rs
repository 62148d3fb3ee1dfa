//! Browser session bootstrap and the page-driver capability.
//!
//! The engine never touches `headless_chrome` directly: it drives a
//! [`PageDriver`], which `BrowserSession` implements over a real Chrome tab.
//! A session is owned by exactly one scrape, and every operation on it after
//! `close()` fails explicitly.

use std::ffi::OsStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use headless_chrome::protocol::cdp::Emulation::{SetLocaleOverride, SetTimezoneOverride};
use headless_chrome::protocol::cdp::Page::AddScriptToEvaluateOnNewDocument;
use headless_chrome::{Browser, LaunchOptions, Tab};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::proxy::{generate_proxy_auth_extension, Proxy};
use crate::stealth;

static USER_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/123.0.0.0 Safari/537.36",
    ]
});

/// The capability the scraping engine consumes: navigate, evaluate a script
/// whose result is JSON, probe liveness, close. All fallible — the page can
/// die under us at any suspension point.
pub trait PageDriver: Send + Sync {
    fn navigate(&self, url: &str) -> Result<()>;

    /// Evaluate a script that returns `JSON.stringify(...)` and parse the
    /// result. Scripts returning bare primitives are passed through as-is.
    fn eval_json(&self, script: &str) -> Result<Value>;

    /// True once the underlying page is gone. Implementations may probe the
    /// page; a failed probe marks the handle closed for good.
    fn is_closed(&self) -> bool;

    fn close(&self) -> Result<()>;
}

/// One structured diagnostic entry. The engine only ever acts on closure;
/// everything else is logging.
#[derive(Debug, Clone)]
pub struct PageEvent {
    pub kind: &'static str,
    pub payload: Value,
}

/// Bounded in-memory event stream for a single session. Replaces scattering
/// ad-hoc listeners through the bootstrap: everything lands here and can be
/// inspected after the scrape.
#[derive(Default)]
pub struct PageEvents {
    entries: Mutex<Vec<PageEvent>>,
}

const MAX_EVENTS: usize = 256;

impl PageEvents {
    pub fn record(&self, kind: &'static str, payload: Value) {
        let mut entries = self.entries.lock().expect("event log poisoned");
        if entries.len() < MAX_EVENTS {
            entries.push(PageEvent { kind, payload });
        }
    }

    pub fn snapshot(&self) -> Vec<PageEvent> {
        self.entries.lock().expect("event log poisoned").clone()
    }
}

/// Options for launching one browser session.
pub struct SessionOptions {
    pub headless: bool,
    pub timezone: String,
    pub locale: String,
    pub proxy: Option<Arc<Proxy>>,
}

/// A live Chrome page behind the [`PageDriver`] capability.
///
/// Owns the browser process: dropping the session (or calling `close`) tears
/// the process down, so a scrape can never leak Chrome on an error path.
pub struct BrowserSession {
    id: String,
    browser: Mutex<Option<Browser>>,
    tab: Arc<Tab>,
    closed: AtomicBool,
    events: Arc<PageEvents>,
}

impl BrowserSession {
    /// Launch Chrome with stealth hardening and hand back a drivable session.
    pub fn launch(opts: &SessionOptions) -> Result<Self> {
        let id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        info!("🚀 [{}] Launching browser...", id);

        let user_agent = {
            use rand::seq::SliceRandom;
            USER_AGENTS
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(USER_AGENTS[0])
        };

        // Owned arg strings must outlive the &OsStr views handed to Chrome.
        let mut owned_args: Vec<String> = vec![
            "--disable-blink-features=AutomationControlled".into(),
            "--no-sandbox".into(),
            "--disable-setuid-sandbox".into(),
            "--disable-dev-shm-usage".into(),
            "--disable-infobars".into(),
            "--no-first-run".into(),
            "--window-position=0,0".into(),
            "--ignore-certificate-errors".into(),
            "--incognito".into(),
            format!("--user-agent={}", user_agent),
        ];
        if opts.headless {
            owned_args.push("--headless=new".into());
        }

        if let Some(ref proxy) = opts.proxy {
            info!(
                "🔄 [{}] Using proxy: {} (success rate {:.0}%)",
                id,
                proxy.id,
                proxy.success_rate() * 100.0
            );
            owned_args.push(format!("--proxy-server={}", proxy.to_chrome_arg()));
            if proxy.requires_auth() {
                let ext_path = generate_proxy_auth_extension(
                    proxy.username.as_deref().unwrap_or_default(),
                    proxy.password.as_deref().unwrap_or_default(),
                )?;
                owned_args.push(format!("--load-extension={}", ext_path));
            }
        }

        let args: Vec<&OsStr> = owned_args.iter().map(OsStr::new).collect();
        let (width, height) = stealth::jittered_viewport();

        let browser = Browser::new(LaunchOptions {
            headless: false, // modern headless goes in via args
            window_size: Some((width, height)),
            args,
            ..Default::default()
        })
        .context("failed to launch browser")?;

        let tab = browser.new_tab().context("failed to open tab")?;

        // Stealth script must land before any page script runs.
        tab.call_method(AddScriptToEvaluateOnNewDocument {
            source: stealth::stealth_script(),
            world_name: None,
            include_command_line_api: None,
            run_immediately: None,
        })
        .context("failed to inject stealth script")?;

        tab.call_method(SetTimezoneOverride { timezone_id: opts.timezone.clone() })?;
        tab.call_method(SetLocaleOverride { locale: Some(opts.locale.clone()) })?;

        let events = Arc::new(PageEvents::default());
        events.record("launched", json!({ "userAgent": user_agent, "viewport": [width, height] }));

        info!("✅ [{}] Browser ready ({}x{})", id, width, height);

        Ok(Self {
            id,
            browser: Mutex::new(Some(browser)),
            tab,
            closed: AtomicBool::new(false),
            events,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn events(&self) -> Arc<PageEvents> {
        self.events.clone()
    }

    /// Trace a pointer arc across the viewport with trusted events. Warmup
    /// policy, called before the engine takes over.
    pub async fn drift_pointer(&self) -> Result<()> {
        self.ensure_open()?;
        let start = stealth::Point::new(100.0, 100.0);
        let end = stealth::Point::new(500.0, 300.0);
        stealth::drift_mouse(&self.tab, start, end).await
    }

    /// Snapshot the session cookies, so a caller can keep the warm state for
    /// a later session. Nothing is persisted here.
    pub fn cookie_names(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        let cookies = self.tab.get_cookies().map_err(|e| anyhow!("cookie read failed: {}", e))?;
        let names: Vec<String> = cookies.into_iter().map(|c| c.name).collect();
        self.events.record("cookies", json!({ "count": names.len() }));
        Ok(names)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("session {} is closed", self.id);
        }
        Ok(())
    }

    fn mark_closed(&self, reason: &str) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            warn!("⚠️ [{}] Page closure detected: {}", self.id, reason);
            self.events.record("closed", json!({ "reason": reason }));
        }
    }
}

impl PageDriver for BrowserSession {
    fn navigate(&self, url: &str) -> Result<()> {
        self.ensure_open()?;
        self.events.record("navigate", json!({ "url": url }));
        self.tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated().map(|_| ()))
            .map_err(|e| anyhow!("navigation failed: {}", e))
    }

    fn eval_json(&self, script: &str) -> Result<Value> {
        self.ensure_open()?;
        let result = self.tab.evaluate(script, false).map_err(|e| {
            self.events.record("evaluate-error", json!({ "error": e.to_string() }));
            anyhow!("script evaluation failed: {}", e)
        })?;
        match result.value {
            Some(Value::String(raw)) => {
                serde_json::from_str(&raw).context("script returned malformed JSON")
            }
            Some(other) => Ok(other),
            None => Ok(Value::Null),
        }
    }

    fn is_closed(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return true;
        }
        // Cheap liveness probe: a dead tab cannot evaluate anything.
        match self.tab.evaluate("1 + 1", false) {
            Ok(_) => false,
            Err(e) => {
                self.mark_closed(&e.to_string());
                true
            }
        }
    }

    fn close(&self) -> Result<()> {
        let mut slot = self.browser.lock().expect("browser slot poisoned");
        match slot.take() {
            Some(_browser) => {
                // Dropping the handle tears down the Chrome process.
                self.closed.store(true, Ordering::SeqCst);
                self.events.record("close", json!({}));
                info!("🔒 [{}] Browser closed", self.id);
                Ok(())
            }
            None => bail!("session {} already closed", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_log_is_bounded() {
        let events = PageEvents::default();
        for i in 0..(MAX_EVENTS + 50) {
            events.record("navigate", json!({ "i": i }));
        }
        assert_eq!(events.snapshot().len(), MAX_EVENTS);
    }

    #[test]
    fn event_snapshot_preserves_order() {
        let events = PageEvents::default();
        events.record("launched", json!({}));
        events.record("navigate", json!({}));
        events.record("close", json!({}));
        let kinds: Vec<_> = events.snapshot().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec!["launched", "navigate", "close"]);
    }
}
