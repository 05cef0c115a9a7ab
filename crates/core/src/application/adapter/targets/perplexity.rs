// Perplexity: anonymous use works, answers carry a sources strip

use crate::application::adapter::strategy::{
    InputStrategy, NewChatStrategy, SubmitStrategy, TargetProfile,
};
use crate::application::adapter::TargetAdapter;

pub const PROFILE: TargetProfile = TargetProfile {
    id: "perplexity",
    entry_url: "https://www.perplexity.ai/",
    host: "perplexity.ai",
    input: &[
        InputStrategy::Rich("#ask-input"),
        InputStrategy::Plain("textarea[placeholder]"),
        InputStrategy::Plain("textarea"),
    ],
    submit: &[
        SubmitStrategy::Button("button[data-testid='submit-button']"),
        SubmitStrategy::Button("button[aria-label='Submit']"),
        SubmitStrategy::EnterKey,
    ],
    new_chat: &[NewChatStrategy::Navigate("https://www.perplexity.ai/")],
    login_markers: &[],
    logged_out_markers: &["div[data-testid='login-modal']"],
    response_selectors: &["div[id^='markdown-content']", "div.prose"],
    generating_markers: &[
        "button[data-testid='stop-generating-response-button']",
        "button[aria-label='Stop']",
    ],
    citation_scopes: &["div[data-testid='sources-list']", "div.citation"],
    captcha_selectors: &[],
};

pub struct Perplexity;

impl TargetAdapter for Perplexity {
    fn profile(&self) -> &TargetProfile {
        &PROFILE
    }
}
