//! Standalone fingerprint checker: launches Chrome with the same hardening
//! flags the service uses and prints what a detection script would see.
//! Run with `cargo run --bin debug_stealth`.

use std::time::Duration;

use anyhow::Result;
use headless_chrome::protocol::cdp::Emulation::{SetLocaleOverride, SetTimezoneOverride};
use headless_chrome::{Browser, LaunchOptions};
use tokio::time::sleep;

#[tokio::main]
async fn main() -> Result<()> {
    println!("🕵️ Starting stealth debugger...");

    // Same args the session bootstrap uses.
    let args = vec![
        std::ffi::OsStr::new("--disable-blink-features=AutomationControlled"),
        std::ffi::OsStr::new("--no-sandbox"),
        std::ffi::OsStr::new("--disable-dev-shm-usage"),
        std::ffi::OsStr::new("--disable-infobars"),
        std::ffi::OsStr::new("--window-position=0,0"),
        std::ffi::OsStr::new("--ignore-certificate-errors"),
        std::ffi::OsStr::new("--incognito"),
        std::ffi::OsStr::new("--user-agent=Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36"),
        std::ffi::OsStr::new("--headless=new"),
    ];

    let browser = Browser::new(LaunchOptions {
        headless: false, // modern headless via args
        window_size: Some((1280, 720)),
        args,
        ..Default::default()
    })?;

    let tab = browser.new_tab()?;
    tab.call_method(SetTimezoneOverride { timezone_id: "Europe/Paris".to_string() })?;
    tab.call_method(SetLocaleOverride { locale: Some("en-US".to_string()) })?;

    println!("Checking IP via ipinfo.io...");
    tab.navigate_to("https://ipinfo.io/json")?;
    tab.wait_until_navigated()?;
    sleep(Duration::from_secs(2)).await;
    println!("IP Info: {}", tab.get_content()?);

    println!("Checking resolved timezone...");
    let tz = tab.evaluate("Intl.DateTimeFormat().resolvedOptions().timeZone", false)?;
    println!("Timezone: {:?}", tz.value);

    println!("Checking webdriver flag...");
    let webdriver = tab.evaluate("String(navigator.webdriver)", false)?;
    println!("navigator.webdriver: {:?}", webdriver.value);

    Ok(())
}
