// DeepSeek: plain textarea; signed-out users are redirected to /sign_in

use crate::application::adapter::strategy::{
    self, InputStrategy, NewChatStrategy, SubmitStrategy, TargetProfile,
};
use crate::application::adapter::{AdapterError, TargetAdapter};
use crate::port::PageDriver;
use async_trait::async_trait;

pub const PROFILE: TargetProfile = TargetProfile {
    id: "deepseek",
    entry_url: "https://chat.deepseek.com/",
    host: "deepseek.com",
    input: &[
        InputStrategy::Plain("textarea#chat-input"),
        InputStrategy::Plain("textarea"),
    ],
    submit: &[
        SubmitStrategy::Button("div[role='button'][aria-label='Send']"),
        SubmitStrategy::EnterKey,
    ],
    new_chat: &[
        NewChatStrategy::Click("div[data-testid='new-chat-button']"),
        NewChatStrategy::Navigate("https://chat.deepseek.com/"),
    ],
    login_markers: &[],
    logged_out_markers: &["input[type='password']", "a[href*='/sign_in']"],
    response_selectors: &[".ds-markdown"],
    generating_markers: &["div[role='button'][aria-label='Stop']", ".ds-loading"],
    citation_scopes: &[".ds-search-results", "div[data-testid='search-results']"],
    captcha_selectors: &[],
};

const SIGN_IN_PATH: &str = "/sign_in";

/// First-line headers of the reasoning ("deep think") block
const THINKING_HEADERS: &[&str] = &["Thought for", "已深度思考", "思考中"];

pub struct DeepSeek;

#[async_trait]
impl TargetAdapter for DeepSeek {
    fn profile(&self) -> &TargetProfile {
        &PROFILE
    }

    async fn is_logged_in(&self, page: &dyn PageDriver) -> Result<bool, AdapterError> {
        if page.current_url().await?.contains(SIGN_IN_PATH) {
            return Ok(false);
        }
        Ok(!strategy::any_exists(page, PROFILE.logged_out_markers).await?)
    }

    fn clean_response(&self, raw: &str) -> String {
        let text = raw.trim();
        match text.split_once('\n') {
            Some((first, rest)) if THINKING_HEADERS.iter().any(|h| first.starts_with(h)) => {
                rest.trim().to_string()
            }
            _ => text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::page_driver::mocks::FixturePage;

    #[tokio::test]
    async fn test_sign_in_redirect_means_logged_out() {
        let page = FixturePage::new("t", "https://chat.deepseek.com/sign_in");
        assert!(!DeepSeek.is_logged_in(&page).await.unwrap());

        let page = FixturePage::new("t", "https://chat.deepseek.com/");
        assert!(DeepSeek.is_logged_in(&page).await.unwrap());
    }

    #[test]
    fn test_thinking_header_is_dropped() {
        assert_eq!(
            DeepSeek.clean_response("已深度思考（用时 12 秒）\n答案在这里"),
            "答案在这里"
        );
        assert_eq!(DeepSeek.clean_response("Just an answer"), "Just an answer");
    }
}
