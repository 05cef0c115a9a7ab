// Doubao: test-id heavy markup, ByteDance slider challenges

use crate::application::adapter::strategy::{
    InputStrategy, NewChatStrategy, SubmitStrategy, TargetProfile,
};
use crate::application::adapter::TargetAdapter;

pub const PROFILE: TargetProfile = TargetProfile {
    id: "doubao",
    entry_url: "https://www.doubao.com/chat/",
    host: "doubao.com",
    input: &[
        InputStrategy::Plain("textarea[data-testid='chat_input_input']"),
        InputStrategy::Plain("textarea"),
    ],
    submit: &[
        SubmitStrategy::Button("button[data-testid='chat_input_send_button']"),
        SubmitStrategy::EnterKey,
    ],
    new_chat: &[
        NewChatStrategy::Click("[data-testid='create_conversation_button']"),
        NewChatStrategy::Navigate("https://www.doubao.com/chat/"),
    ],
    login_markers: &["[data-testid='chat_header_avatar_button']"],
    logged_out_markers: &["[data-testid='to_login_button']"],
    response_selectors: &[
        "[data-testid='receive_message'] [data-testid='message_text_content']",
        "[data-testid='receive_message']",
    ],
    generating_markers: &["[data-testid='chat_input_local_break_button']"],
    citation_scopes: &["[data-testid='search-reference-ui']"],
    captcha_selectors: &["[class*='verify-container']", "#vc_captcha_box"],
};

pub struct Doubao;

impl TargetAdapter for Doubao {
    fn profile(&self) -> &TargetProfile {
        &PROFILE
    }
}
