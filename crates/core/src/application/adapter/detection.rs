// CAPTCHA / network-error pre-flight checks
//
// Structural markers first (cheap selector probes), then phrase matching
// against the visible text. The answer region is cut out of that text, since
// an answer may legitimately quote any of these phrases. Lists are shared by
// every target.

use crate::port::{DriverError, PageDriver};

/// Challenge overlays and widgets
pub const CAPTCHA_SELECTORS: &[&str] = &[
    "#challenge-form",
    "#challenge-stage",
    "#cf-challenge-running",
    ".cf-turnstile",
    "#turnstile-wrapper",
    ".g-recaptcha",
    ".h-captcha",
    "#px-captcha",
    "#arkose",
    ".geetest_panel",
    ".geetest_holder",
    "#nc_1_wrapper",
    "#captcha_container",
    ".captcha-verify-container",
    ".vc-captcha-verify",
    "#verify-bar-box",
];

/// iframe `src` fragments of challenge providers
pub const CAPTCHA_IFRAME_PATTERNS: &[&str] = &[
    "challenges.cloudflare.com",
    "hcaptcha.com",
    "google.com/recaptcha",
    "recaptcha.net",
    "arkoselabs.com",
    "funcaptcha.com",
    "geetest.com",
    "captcha",
];

/// Lower-case phrases shown on challenge pages
pub const CAPTCHA_PHRASES: &[&str] = &[
    "verify you are human",
    "verifying you are human",
    "are you a robot",
    "i'm not a robot",
    "checking your browser",
    "checking if the site connection is secure",
    "unusual traffic",
    "complete the security check",
    "press and hold",
    "请完成安全验证",
    "人机验证",
    "请拖动滑块",
    "拖动下方滑块",
    "滑动验证",
    "请完成下列验证",
    "安全验证",
];

/// Browser / app error surfaces
pub const NETWORK_ERROR_SELECTORS: &[&str] = &[
    "#main-frame-error",
    ".neterror",
    "#error-information-popup-container",
];

/// Lower-case network failure phrases
pub const NETWORK_ERROR_PHRASES: &[&str] = &[
    "err_internet_disconnected",
    "err_connection_reset",
    "err_connection_refused",
    "err_connection_timed_out",
    "err_name_not_resolved",
    "err_network_changed",
    "this site can’t be reached",
    "this site can't be reached",
    "you are offline",
    "no internet",
    "network connection was lost",
    "check your internet connection",
    "网络错误",
    "网络连接失败",
    "网络异常",
    "网络连接已断开",
    "请检查网络",
    "服务器繁忙",
];

/// First phrase in `phrases` contained in `text` (case-insensitive)
pub fn match_phrase(text: &str, phrases: &[&'static str]) -> Option<&'static str> {
    let lower = text.to_lowercase();
    phrases.iter().copied().find(|p| lower.contains(p))
}

/// First iframe whose `src` belongs to a challenge provider
pub fn match_iframe(sources: &[String]) -> Option<String> {
    sources
        .iter()
        .find(|src| {
            let lower = src.to_lowercase();
            CAPTCHA_IFRAME_PATTERNS.iter().any(|p| lower.contains(p))
        })
        .cloned()
}

/// `Some(marker)` when the page shows a challenge.
/// Text under `answer_selectors` is not phrase-matched.
pub async fn detect_captcha(
    page: &dyn PageDriver,
    extra_selectors: &[&str],
    answer_selectors: &[&str],
) -> Result<Option<String>, DriverError> {
    for selector in CAPTCHA_SELECTORS.iter().copied().chain(extra_selectors.iter().copied()) {
        if page.exists(selector).await? {
            return Ok(Some(format!("selector {}", selector)));
        }
    }
    if let Some(src) = match_iframe(&page.iframe_sources().await?) {
        return Ok(Some(format!("iframe {}", src)));
    }
    let text = page.visible_text(answer_selectors).await?;
    Ok(match_phrase(&text, CAPTCHA_PHRASES).map(|p| format!("phrase \"{}\"", p)))
}

/// `Some(marker)` when the page shows a connectivity failure
pub async fn detect_network_error(
    page: &dyn PageDriver,
    answer_selectors: &[&str],
) -> Result<Option<String>, DriverError> {
    for selector in NETWORK_ERROR_SELECTORS {
        if page.exists(selector).await? {
            return Ok(Some(format!("selector {}", selector)));
        }
    }
    let text = page.visible_text(answer_selectors).await?;
    Ok(match_phrase(&text, NETWORK_ERROR_PHRASES).map(|p| format!("phrase \"{}\"", p)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::page_driver::mocks::FixturePage;

    #[tokio::test]
    async fn test_challenge_iframe_is_captcha() {
        let page = FixturePage::new("t", "https://www.perplexity.ai/")
            .with_iframe("https://challenges.cloudflare.com/cdn-cgi/challenge-platform/h/b/turnstile/if/ov2");
        let hit = detect_captcha(&page, &[], &[]).await.unwrap();
        assert!(hit.unwrap().contains("challenges.cloudflare.com"));
    }

    #[tokio::test]
    async fn test_neutral_page_is_clean() {
        let page = FixturePage::new("t", "https://www.perplexity.ai/")
            .with_iframe("https://www.youtube.com/embed/xyz")
            .with_visible_text("Where knowledge begins. Ask anything.");
        assert!(detect_captcha(&page, &[], &[]).await.unwrap().is_none());
        assert!(detect_network_error(&page, &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_phrases_match_case_insensitively() {
        let page = FixturePage::new("t", "https://chat.deepseek.com/")
            .with_visible_text("Please VERIFY YOU ARE HUMAN to continue");
        assert!(detect_captcha(&page, &[], &[]).await.unwrap().is_some());

        let page = FixturePage::new("t", "https://www.kimi.com/").with_visible_text("网络异常，请稍后重试");
        assert!(detect_network_error(&page, &[]).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_target_specific_selector() {
        let page = FixturePage::new("t", "https://www.doubao.com/").with_element("#slider-verify");
        assert!(detect_captcha(&page, &["#slider-verify"], &[])
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_phrases_inside_the_answer_are_ignored() {
        let page = FixturePage::new("t", "https://www.perplexity.ai/")
            .with_visible_text("Ask anything")
            .with_text_frames(".answer", ["请先开启安全验证。服务器繁忙时可以稍后再试。"]);

        assert!(detect_captcha(&page, &[], &[".answer"]).await.unwrap().is_none());
        assert!(detect_network_error(&page, &[".answer"]).await.unwrap().is_none());
        // Same phrases outside the answer still count
        assert!(detect_captcha(&page, &[], &[]).await.unwrap().is_some());
        assert!(detect_network_error(&page, &[]).await.unwrap().is_some());
    }
}
