// Kimi: contenteditable editor, search results listed beside the answer

use crate::application::adapter::strategy::{
    InputStrategy, NewChatStrategy, SubmitStrategy, TargetProfile,
};
use crate::application::adapter::TargetAdapter;

pub const PROFILE: TargetProfile = TargetProfile {
    id: "kimi",
    entry_url: "https://www.kimi.com/",
    host: "kimi.com",
    input: &[
        InputStrategy::Rich(".chat-input-editor[contenteditable='true']"),
        InputStrategy::Rich("div[contenteditable='true']"),
        InputStrategy::Plain("textarea"),
    ],
    submit: &[
        SubmitStrategy::Button(".send-button-container .send-button"),
        SubmitStrategy::Button("button[data-testid='msh-chatinput-send-button']"),
        SubmitStrategy::EnterKey,
    ],
    new_chat: &[
        NewChatStrategy::Click("a.new-chat-btn"),
        NewChatStrategy::Navigate("https://www.kimi.com/"),
    ],
    login_markers: &[".user-info .avatar", "img.user-avatar"],
    logged_out_markers: &[".login-button", "div.login-modal"],
    response_selectors: &[".segment-assistant .markdown", ".segment-content-box .markdown"],
    generating_markers: &[".send-button-container.stop", ".segment-assistant .typing"],
    citation_scopes: &[".search-result-list", ".sites-list"],
    captcha_selectors: &[],
};

pub struct Kimi;

impl TargetAdapter for Kimi {
    fn profile(&self) -> &TargetProfile {
        &PROFILE
    }
}
