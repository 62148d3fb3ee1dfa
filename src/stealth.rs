//! Anti-automation hardening.
//!
//! Everything here is best-effort policy with no correctness contract: the
//! injection script papers over the usual headless giveaways, and the input
//! helpers make pointer activity look hand-driven. The engine works the same
//! with all of it disabled.

use std::sync::Arc;

use anyhow::Result;
use headless_chrome::protocol::cdp::Input::{
    DispatchMouseEvent, DispatchMouseEventPointer_TypeOption, DispatchMouseEventTypeOption,
};
use headless_chrome::Tab;
use rand::Rng;

/// Script injected before any page script runs. Covers the checks ad
/// platforms actually perform: webdriver flag, chrome runtime object,
/// permissions API, plugin list, hardware hints, canvas/WebGL entropy.
pub fn stealth_script() -> String {
    r#"
(() => {
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });

    Object.defineProperty(navigator, 'hardwareConcurrency', {
        get: () => 4 + 2 * Math.floor(Math.random() * 4),
    });
    Object.defineProperty(navigator, 'deviceMemory', {
        get: () => [4, 8, 16][Math.floor(Math.random() * 3)],
    });

    if (!window.chrome) {
        window.chrome = {
            runtime: {
                connect: () => ({
                    onMessage: { addListener: () => {}, removeListener: () => {} },
                    postMessage: () => {},
                    disconnect: () => {},
                }),
                sendMessage: () => {},
                onMessage: { addListener: () => {}, removeListener: () => {} },
            },
            app: { isInstalled: false },
            csi: () => {},
            loadTimes: () => ({ navigationType: 'Other', npnNegotiatedProtocol: 'h2' }),
        };
    }

    const originalQuery = window.navigator.permissions.query;
    window.navigator.permissions.query = (parameters) =>
        parameters.name === 'notifications'
            ? Promise.resolve({ state: Notification.permission })
            : originalQuery(parameters);

    const pdfPlugin = {
        0: { type: 'application/x-google-chrome-pdf', suffixes: 'pdf' },
        description: 'Portable Document Format',
        filename: 'internal-pdf-viewer',
        length: 1,
        name: 'Chrome PDF Plugin',
    };
    Object.defineProperty(navigator, 'plugins', {
        get: () => {
            const plugins = [pdfPlugin, pdfPlugin, pdfPlugin];
            Object.setPrototypeOf(plugins, PluginArray.prototype);
            return plugins;
        },
    });

    const getParameter = WebGLRenderingContext.prototype.getParameter;
    WebGLRenderingContext.prototype.getParameter = function (parameter) {
        if (parameter === 37445) { return 'Intel Inc.'; }
        if (parameter === 37446) { return 'Intel Iris OpenGL Engine'; }
        return getParameter.apply(this, [parameter]);
    };

    const toDataURL = HTMLCanvasElement.prototype.toDataURL;
    HTMLCanvasElement.prototype.toDataURL = function (...args) {
        if (this.width > 16 && this.height > 16) {
            const context = this.getContext('2d');
            if (context) {
                const image = context.getImageData(0, 0, this.width, this.height);
                for (let i = 0; i < 4; i++) {
                    const idx = 4 * Math.floor(Math.random() * this.width * this.height) + 3;
                    if (image.data[idx] > 0) {
                        image.data[idx] += Math.random() > 0.5 ? 1 : -1;
                    }
                }
                context.putImageData(image, 0, 0);
            }
        }
        return toDataURL.apply(this, args);
    };
})();
"#
    .to_string()
}

/// Script that skims the open dialog the way a reader would: a short scroll
/// down and back, plus pointer events inside its bounds.
pub fn modal_interaction_script() -> String {
    r#"
JSON.stringify((() => {
    const modal = document.querySelector('div[role="dialog"]');
    if (!modal) { return false; }
    let offset = 0;
    const ticker = setInterval(() => {
        offset += 50;
        modal.scrollTop = offset;
        if (offset > 200) {
            clearInterval(ticker);
            modal.scrollTop = 0;
        }
    }, 200);
    const rect = modal.getBoundingClientRect();
    for (const type of ['mousemove', 'mouseenter']) {
        modal.dispatchEvent(new MouseEvent(type, {
            clientX: rect.left + rect.width * (0.3 + Math.random() * 0.4),
            clientY: rect.top + rect.height * (0.3 + Math.random() * 0.4),
            bubbles: true,
        }));
    }
    return true;
})())
"#
    .to_string()
}

/// A plausible desktop viewport, varied per session.
pub fn jittered_viewport() -> (u32, u32) {
    let mut rng = rand::thread_rng();
    let width = 1280 + rng.gen_range(-100i32..100);
    let height = 720 + rng.gen_range(-100i32..100);
    (width as u32, height as u32)
}

#[derive(Debug, Clone, Copy)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

fn cubic_bezier(t: f64, p0: Point, p1: Point, p2: Point, p3: Point) -> Point {
    let cx = 3.0 * (p1.x - p0.x);
    let bx = 3.0 * (p2.x - p1.x) - cx;
    let ax = p3.x - p0.x - cx - bx;

    let cy = 3.0 * (p1.y - p0.y);
    let by = 3.0 * (p2.y - p1.y) - cy;
    let ay = p3.y - p0.y - cy - by;

    Point {
        x: (ax * t.powi(3)) + (bx * t.powi(2)) + (cx * t) + p0.x,
        y: (ay * t.powi(3)) + (by * t.powi(2)) + (cy * t) + p0.y,
    }
}

/// Sample an arced path from `start` to `end`, with randomized control points
/// so no two traversals look alike.
pub fn mouse_path(start: Point, end: Point, steps: usize) -> Vec<Point> {
    let variance = 100.0;
    let (p1, p2) = {
        let mut rng = rand::thread_rng();
        let mut control = || {
            Point::new(
                start.x + (end.x - start.x) * rng.gen_range(0.2..0.8)
                    + rng.gen_range(-variance..variance),
                start.y + (end.y - start.y) * rng.gen_range(0.2..0.8)
                    + rng.gen_range(-variance..variance),
            )
        };
        (control(), control())
    };

    (0..=steps)
        .map(|i| cubic_bezier(i as f64 / steps as f64, start, p1, p2, end))
        .collect()
}

/// Trace a human-looking pointer arc with trusted CDP events.
pub async fn drift_mouse(tab: &Arc<Tab>, start: Point, end: Point) -> Result<()> {
    for point in mouse_path(start, end, 25) {
        tab.call_method(DispatchMouseEvent {
            x: point.x,
            y: point.y,
            Type: DispatchMouseEventTypeOption::MouseMoved,
            button: None,
            buttons: None,
            modifiers: None,
            timestamp: None,
            delta_x: None,
            delta_y: None,
            pointer_Type: Some(DispatchMouseEventPointer_TypeOption::Mouse),
            force: None,
            tangential_pressure: None,
            tilt_x: None,
            tilt_y: None,
            twist: None,
            click_count: None,
        })?;

        let delay = rand::thread_rng().gen_range(5..15);
        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stealth_script_covers_key_probes() {
        let script = stealth_script();
        assert!(script.contains("navigator, 'webdriver'"));
        assert!(script.contains("window.chrome"));
        assert!(script.contains("HTMLCanvasElement.prototype.toDataURL"));
        assert!(script.contains("WebGLRenderingContext.prototype.getParameter"));
    }

    #[test]
    fn viewport_jitter_stays_in_range() {
        for _ in 0..50 {
            let (w, h) = jittered_viewport();
            assert!((1180..1380).contains(&w));
            assert!((620..820).contains(&h));
        }
    }

    #[test]
    fn mouse_path_hits_both_endpoints() {
        let start = Point::new(100.0, 100.0);
        let end = Point::new(500.0, 300.0);
        let path = mouse_path(start, end, 25);
        assert_eq!(path.len(), 26);
        assert!((path[0].x - start.x).abs() < 1e-6);
        assert!((path[0].y - start.y).abs() < 1e-6);
        assert!((path[25].x - end.x).abs() < 1e-6);
        assert!((path[25].y - end.y).abs() < 1e-6);
    }
}
