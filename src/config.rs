//! Runtime configuration.
//!
//! Every timing knob, retry cap and locale text table the engine uses lives
//! here, loaded from the environment with sane defaults. Nothing in the
//! control flow hardcodes a delay.

use std::env;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

/// A bounded random delay window in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct JitterWindow {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl JitterWindow {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// Sample a duration from the window.
    pub fn sample(&self) -> Duration {
        if self.max_ms <= self.min_ms {
            return Duration::from_millis(self.min_ms);
        }
        let ms = rand::thread_rng().gen_range(self.min_ms..self.max_ms);
        Duration::from_millis(ms)
    }
}

/// Anti-detection behavior. Policy only: the engine's state machine never
/// depends on any of this being enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanBehavior {
    pub enabled: bool,
    /// Number of casual partial-scroll passes before the main loop.
    pub browse_passes: u32,
    pub browse_pause: JitterWindow,
    /// Delay inserted between opening the detail view and looking for the
    /// transparency link.
    pub modal_delay: JitterWindow,
}

impl Default for HumanBehavior {
    fn default() -> Self {
        Self {
            enabled: true,
            browse_passes: 3,
            browse_pause: JitterWindow::new(3000, 5000),
            modal_delay: JitterWindow::new(500, 1000),
        }
    }
}

/// Localized text variants the scanner and extractor match against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocaleText {
    pub details_button: Vec<String>,
    pub transparency_link: Vec<String>,
    pub close_button: Vec<String>,
    pub reach_heading: Vec<String>,
    pub library_id_label: Vec<String>,
}

impl Default for LocaleText {
    fn default() -> Self {
        let owned = |v: &[&str]| v.iter().map(|s| s.to_string()).collect();
        Self {
            details_button: owned(&["See ad details", "Voir les détails de la publicité"]),
            transparency_link: owned(&[
                "European Union transparency",
                "Transparency by location",
                "Transparence de l’Union européenne",
                "Transparence par lieu",
            ]),
            close_button: owned(&["Close", "Fermer"]),
            reach_heading: owned(&["Reach", "Couverture"]),
            library_id_label: owned(&["Library ID", "ID dans la bibliothèque"]),
        }
    }
}

/// Knobs for the scraping engine itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hard cap on how many candidates one scrape will process.
    pub max_iterations: u32,
    pub max_scroll_attempts: u32,
    pub scroll_settle: Duration,
    pub stability_timeout: Duration,
    pub stability_poll: Duration,
    /// Wait right after navigation before touching the page.
    pub initial_settle: Duration,
    pub post_navigation_wait: JitterWindow,
    /// Settle before each iteration starts poking the DOM.
    pub iteration_settle: JitterWindow,
    /// Pause after clicking the transparency link, before re-probing.
    pub link_settle: Duration,
    pub extract_settle: Duration,
    pub post_close_settle: Duration,
    pub human: HumanBehavior,
    pub locale: LocaleText,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            max_scroll_attempts: 40,
            scroll_settle: Duration::from_millis(2000),
            stability_timeout: Duration::from_secs(30),
            stability_poll: Duration::from_millis(250),
            initial_settle: Duration::from_millis(5000),
            post_navigation_wait: JitterWindow::new(5000, 8000),
            iteration_settle: JitterWindow::new(500, 1000),
            link_settle: Duration::from_millis(1000),
            extract_settle: Duration::from_millis(500),
            post_close_settle: Duration::from_millis(1000),
            human: HumanBehavior::default(),
            locale: LocaleText::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.max_iterations = env_u32("SCRAP_MAX_ITERATIONS", cfg.max_iterations);
        cfg.max_scroll_attempts = env_u32("SCRAP_MAX_SCROLL_ATTEMPTS", cfg.max_scroll_attempts);
        cfg.scroll_settle =
            Duration::from_millis(env_u64("SCRAP_SCROLL_SETTLE_MS", cfg.scroll_settle.as_millis() as u64));
        cfg.stability_timeout =
            Duration::from_millis(env_u64("SCRAP_STABILITY_TIMEOUT_MS", cfg.stability_timeout.as_millis() as u64));
        cfg.human.enabled = env_bool("SCRAP_HUMAN_BEHAVIOR", cfg.human.enabled);
        cfg
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Static secret compared against the caller's bearer token.
    pub api_token: String,
    pub headless: bool,
    /// Timezone/locale overrides applied to every browser session.
    pub timezone: String,
    pub browser_locale: String,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_u32("PORT", 3000) as u16,
            api_token: env::var("SCRAP_API_TOKEN").unwrap_or_default(),
            headless: env_bool("SCRAP_HEADLESS", true),
            timezone: env::var("SCRAP_TIMEZONE").unwrap_or_else(|_| "Europe/Paris".to_string()),
            browser_locale: env::var("SCRAP_LOCALE").unwrap_or_else(|_| "en-US".to_string()),
            engine: EngineConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_window_stays_in_bounds() {
        let window = JitterWindow::new(100, 200);
        for _ in 0..50 {
            let d = window.sample();
            assert!(d >= Duration::from_millis(100));
            assert!(d < Duration::from_millis(200));
        }
    }

    #[test]
    fn degenerate_jitter_window_is_constant() {
        let window = JitterWindow::new(250, 250);
        assert_eq!(window.sample(), Duration::from_millis(250));
    }

    #[test]
    fn locale_defaults_cover_both_languages() {
        let locale = LocaleText::default();
        assert!(locale.reach_heading.iter().any(|v| v == "Reach"));
        assert!(locale.reach_heading.iter().any(|v| v == "Couverture"));
        assert_eq!(locale.close_button.len(), 2);
    }
}
