// ChatGPT: ProseMirror composer, requires a signed-in account

use crate::application::adapter::strategy::{
    InputStrategy, NewChatStrategy, SubmitStrategy, TargetProfile,
};
use crate::application::adapter::TargetAdapter;

pub const PROFILE: TargetProfile = TargetProfile {
    id: "chatgpt",
    entry_url: "https://chatgpt.com/",
    host: "chatgpt.com",
    input: &[
        InputStrategy::Rich("#prompt-textarea[contenteditable='true']"),
        InputStrategy::Rich("div.ProseMirror[contenteditable='true']"),
        InputStrategy::Plain("textarea#prompt-textarea"),
        InputStrategy::Plain("textarea"),
    ],
    submit: &[
        SubmitStrategy::Button("button[data-testid='send-button']"),
        SubmitStrategy::Button("#composer-submit-button"),
        SubmitStrategy::EnterKey,
    ],
    new_chat: &[
        NewChatStrategy::Click("a[data-testid='create-new-chat-button']"),
        NewChatStrategy::Navigate("https://chatgpt.com/"),
    ],
    login_markers: &[
        "button[data-testid='profile-button']",
        "[data-testid='accounts-profile-button']",
    ],
    logged_out_markers: &[
        "button[data-testid='login-button']",
        "[data-testid='welcome-back-modal']",
    ],
    response_selectors: &[
        "div[data-message-author-role='assistant'] .markdown",
        "div[data-message-author-role='assistant']",
    ],
    generating_markers: &["button[data-testid='stop-button']", ".result-streaming"],
    citation_scopes: &["div[data-message-author-role='assistant'] [data-testid='webpage-citation-pill']"],
    captcha_selectors: &[],
};

/// Screen-reader heading rendered inside the assistant turn
const SPEAKER_LABEL: &str = "ChatGPT said:";

pub struct ChatGpt;

impl TargetAdapter for ChatGpt {
    fn profile(&self) -> &TargetProfile {
        &PROFILE
    }

    fn clean_response(&self, raw: &str) -> String {
        let text = raw.trim();
        text.strip_prefix(SPEAKER_LABEL)
            .unwrap_or(text)
            .trim()
            .to_string()
    }
}
