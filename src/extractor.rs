//! Field extraction from the stabilized transparency view.
//!
//! The markup carries no stable ids or classes, so extraction leans on text
//! and sibling relationships: the payload sits in the sibling after the
//! "Reach" heading's parent, the library id in a span inside an open dialog,
//! the date in the node right after the id, and the advertiser nickname (rare)
//! behind the menu trigger's previous sibling.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::LocaleText;
use crate::session::PageDriver;

/// Extraction result. When `found` is false, the diagnostic fields say what
/// the page actually showed — they are part of the contract, since a miss on
/// a changed layout is only debuggable through them.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub found: bool,
    /// Raw text of the node carrying the transparency payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_text: Option<String>,
    /// Numeric library identifier, when the dialog exposes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ad_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ad_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Diagnostics on a miss: how many headings were scanned and their texts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headings_scanned: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_texts: Option<Vec<String>>,
}

const EXTRACT_TEMPLATE: &str = r#"
JSON.stringify((() => {
    const reachVariants = __REACH__;
    const idLabels = __ID_LABELS__;
    const headings = Array.from(document.querySelectorAll('div[role="heading"]'));
    const headingTexts = [];
    for (const heading of headings) {
        const headingText = (heading.textContent || '').trim();
        headingTexts.push(headingText);
        if (!headingText || !reachVariants.some((v) => headingText.includes(v))) {
            continue;
        }
        const parent = heading.parentElement;
        if (!parent || !parent.nextElementSibling) {
            continue;
        }
        const data = (parent.nextElementSibling.textContent || '').trim();
        if (!data) {
            continue;
        }

        let adId = null;
        let idNode = null;
        let nickname = null;
        for (const dialog of Array.from(document.querySelectorAll('div[role="dialog"]'))) {
            for (const div of Array.from(dialog.querySelectorAll('div'))) {
                const span = div.querySelector('span');
                if (span && span.textContent && idLabels.some((v) => span.textContent.includes(v))) {
                    const digits = span.textContent.match(/\d+/);
                    adId = digits ? digits[0] : null;
                    idNode = div;
                    break;
                }
            }
            const menuTrigger = dialog.querySelector('[aria-haspopup="menu"]');
            if (menuTrigger && menuTrigger.parentElement) {
                const labelHost = menuTrigger.parentElement.previousElementSibling;
                const label = labelHost ? labelHost.querySelector('span, div') : null;
                if (label && label.textContent) {
                    nickname = label.textContent.trim();
                }
            }
            if (adId) {
                break;
            }
        }

        let adDate = null;
        if (idNode && idNode.nextElementSibling) {
            adDate = (idNode.nextElementSibling.textContent || '').trim() || null;
        }

        return {
            found: true,
            data: data,
            headingText: headingText,
            adId: adId,
            adDate: adDate,
            nickname: nickname
        };
    }
    return {
        found: false,
        headingsScanned: headings.length,
        headingTexts: headingTexts
    };
})())
"#;

fn extract_script(locale: &LocaleText) -> String {
    let reach = serde_json::to_string(&locale.reach_heading).unwrap_or_else(|_| "[]".into());
    let labels = serde_json::to_string(&locale.library_id_label).unwrap_or_else(|_| "[]".into());
    EXTRACT_TEMPLATE
        .replace("__REACH__", &reach)
        .replace("__ID_LABELS__", &labels)
}

/// Run the extraction pass against the current detail view.
pub fn extract_transparency_fields(
    driver: &dyn PageDriver,
    locale: &LocaleText,
) -> Result<ExtractionResult> {
    let value = driver.eval_json(&extract_script(locale))?;
    serde_json::from_value(value).context("extraction result had unexpected shape")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_embeds_locale_variants() {
        let script = extract_script(&LocaleText::default());
        assert!(script.contains(r#"["Reach","Couverture"]"#));
        assert!(script.contains("Library ID"));
        assert!(!script.contains("__REACH__"));
        assert!(!script.contains("__ID_LABELS__"));
    }

    #[test]
    fn miss_result_deserializes_with_diagnostics() {
        let raw = serde_json::json!({
            "found": false,
            "headingsScanned": 4,
            "headingTexts": ["Sponsored", "About"]
        });
        let result: ExtractionResult = serde_json::from_value(raw).unwrap();
        assert!(!result.found);
        assert_eq!(result.headings_scanned, Some(4));
        assert_eq!(result.heading_texts.as_ref().unwrap().len(), 2);
        assert!(result.data.is_none());
    }

    #[test]
    fn hit_result_deserializes_all_fields() {
        let raw = serde_json::json!({
            "found": true,
            "data": "12,345 accounts",
            "headingText": "Reach",
            "adId": "730411231",
            "adDate": "Started running on 2 Aug 2026",
            "nickname": null
        });
        let result: ExtractionResult = serde_json::from_value(raw).unwrap();
        assert!(result.found);
        assert_eq!(result.ad_id.as_deref(), Some("730411231"));
        assert!(result.nickname.is_none());
    }
}
