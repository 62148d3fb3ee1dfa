//! Element scanning and clicking against the live DOM.
//!
//! The page mutates between every step (opening or closing the detail view
//! reorders and renumbers elements), so nothing here ever caches a result:
//! every operation re-runs the full DOM query and works with positional
//! indices into that fresh match list.
//!
//! Matching policy: an element matches when any descendant div's trimmed text
//! exactly equals one of the locale variants, or when the element's own text
//! contains a variant as a substring. The exact branch avoids false positives
//! from superset phrases; the substring branch catches single-level markup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::PageDriver;

/// Role selector for clickable controls (primary trigger, close control).
pub const BUTTON_ROLE: &str = "div[role=\"button\"]";
/// Role selector for link-like controls (the transparency link).
pub const LINK_ROLE: &str = "[role=\"link\"]";

/// One candidate located by a scan. The index is an ordinal among matches of
/// that scan only; it must be re-resolved before every use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateMatch {
    pub index: usize,
    pub text: String,
}

/// Result of clicking a candidate by ordinal.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClickResult {
    pub text: String,
    pub clicked: bool,
}

/// Result of clicking the first matching element. `found: false` is a
/// soft-miss, not an error.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FirstMatchClick {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

const SCAN_TEMPLATE: &str = r#"
JSON.stringify((() => {
    if (!document || !document.body || !document.querySelectorAll) {
        return { matches: [] };
    }
    const variants = __VARIANTS__;
    const matches = [];
    for (const node of Array.from(document.querySelectorAll('__ROLE__'))) {
        try {
            const inner = Array.from(node.querySelectorAll('div'));
            const exact = inner.some(
                (div) => div.textContent && variants.indexOf(div.textContent.trim()) !== -1
            );
            const text = node.textContent || '';
            const loose = variants.some((v) => text.includes(v));
            if (exact || loose) {
                matches.push({ index: matches.length, text: text.trim() });
            }
        } catch (err) {}
    }
    return { matches };
})())
"#;

const CLICK_AT_TEMPLATE: &str = r#"
JSON.stringify((() => {
    if (!document || !document.querySelectorAll) {
        return { found: false };
    }
    const variants = __VARIANTS__;
    const target = __TARGET__;
    let ordinal = 0;
    for (const node of Array.from(document.querySelectorAll('__ROLE__'))) {
        try {
            const inner = Array.from(node.querySelectorAll('div'));
            const exact = inner.some(
                (div) => div.textContent && variants.indexOf(div.textContent.trim()) !== -1
            );
            const text = node.textContent || '';
            const loose = variants.some((v) => text.includes(v));
            if (exact || loose) {
                if (ordinal === target) {
                    node.click();
                    return { found: true, text: text.trim() };
                }
                ordinal += 1;
            }
        } catch (err) {}
    }
    return { found: false };
})())
"#;

const CLICK_FIRST_TEMPLATE: &str = r#"
JSON.stringify((() => {
    if (!document || !document.querySelectorAll) {
        return { found: false };
    }
    const variants = __VARIANTS__;
    for (const node of Array.from(document.querySelectorAll('__ROLE__'))) {
        try {
            const inner = Array.from(node.querySelectorAll('div'));
            const exact = inner.some(
                (div) => div.textContent && variants.indexOf(div.textContent.trim()) !== -1
            );
            const text = node.textContent || '';
            const loose = variants.some((v) => text.includes(v));
            if (exact || loose) {
                node.click();
                return { found: true, text: text.trim() };
            }
        } catch (err) {}
    }
    return { found: false };
})())
"#;

fn fill(template: &str, role: &str, variants: &[String]) -> String {
    let json = serde_json::to_string(variants).unwrap_or_else(|_| "[]".to_string());
    template.replace("__VARIANTS__", &json).replace("__ROLE__", role)
}

/// Scan the whole DOM for elements matching the role + text predicate,
/// returning their ordinal positions in document order.
pub fn find_all_matching(
    driver: &dyn PageDriver,
    role: &str,
    variants: &[String],
) -> Result<Vec<CandidateMatch>> {
    #[derive(Deserialize)]
    struct Scan {
        matches: Vec<CandidateMatch>,
    }
    let value = driver.eval_json(&fill(SCAN_TEMPLATE, role, variants))?;
    let scan: Scan = serde_json::from_value(value).context("scan result had unexpected shape")?;
    Ok(scan.matches)
}

/// Re-scan and click the match at ordinal `index`. `Ok(None)` means the index
/// no longer resolves — the DOM moved on — which the caller records as a
/// soft failure and survives.
pub fn click_at(
    driver: &dyn PageDriver,
    role: &str,
    variants: &[String],
    index: usize,
) -> Result<Option<ClickResult>> {
    let script = fill(CLICK_AT_TEMPLATE, role, variants).replace("__TARGET__", &index.to_string());
    let value = driver.eval_json(&script)?;
    let hit = value.get("found").and_then(Value::as_bool).unwrap_or(false);
    if !hit {
        return Ok(None);
    }
    let text = value
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(Some(ClickResult { text, clicked: true }))
}

/// Re-scan and click the first match, if any.
pub fn click_first(
    driver: &dyn PageDriver,
    role: &str,
    variants: &[String],
) -> Result<FirstMatchClick> {
    let value = driver.eval_json(&fill(CLICK_FIRST_TEMPLATE, role, variants))?;
    serde_json::from_value(value).context("click result had unexpected shape")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_injects_role_and_variants() {
        let variants = vec!["Close".to_string(), "Fermer".to_string()];
        let script = fill(SCAN_TEMPLATE, BUTTON_ROLE, &variants);
        assert!(script.contains(r#"document.querySelectorAll('div[role="button"]')"#));
        assert!(script.contains(r#"["Close","Fermer"]"#));
        assert!(!script.contains("__ROLE__"));
        assert!(!script.contains("__VARIANTS__"));
    }

    #[test]
    fn click_at_injects_target_ordinal() {
        let variants = vec!["See ad details".to_string()];
        let script =
            fill(CLICK_AT_TEMPLATE, BUTTON_ROLE, &variants).replace("__TARGET__", "7");
        assert!(script.contains("const target = 7;"));
    }

    #[test]
    fn variants_with_quotes_are_escaped() {
        let variants = vec!["l'exemple \"cité\"".to_string()];
        let script = fill(CLICK_FIRST_TEMPLATE, LINK_ROLE, &variants);
        assert!(script.contains(r#"l'exemple \"cité\""#));
    }
}
