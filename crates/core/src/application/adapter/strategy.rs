// Fallback chains as data
//
// Each list is tried in order until one strategy applies.

use super::AdapterError;
use crate::port::{InputKind, PageDriver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStrategy {
    /// `<textarea>` / `<input>`
    Plain(&'static str),
    /// contenteditable editor (ProseMirror, Lexical, Slate)
    Rich(&'static str),
}

impl InputStrategy {
    pub fn selector(&self) -> &'static str {
        match self {
            InputStrategy::Plain(s) | InputStrategy::Rich(s) => *s,
        }
    }

    pub fn kind(&self) -> InputKind {
        match self {
            InputStrategy::Plain(_) => InputKind::Plain,
            InputStrategy::Rich(_) => InputKind::Rich,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStrategy {
    /// Click if present and enabled
    Button(&'static str),
    /// Synthetic Enter on the first input surface found
    EnterKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewChatStrategy {
    /// Click an in-page "new chat" control if present
    Click(&'static str),
    /// Load a URL that always opens a fresh conversation
    Navigate(&'static str),
}

/// Everything target-specific that is not code
#[derive(Debug, Clone, Copy)]
pub struct TargetProfile {
    pub id: &'static str,
    pub entry_url: &'static str,
    /// Registrable host; links back to it are not citations
    pub host: &'static str,
    pub input: &'static [InputStrategy],
    pub submit: &'static [SubmitStrategy],
    pub new_chat: &'static [NewChatStrategy],
    /// Present only for a signed-in user. Empty: anonymous use is fine.
    pub login_markers: &'static [&'static str],
    /// Present only for a signed-out user (login button, auth modal)
    pub logged_out_markers: &'static [&'static str],
    /// Answer containers, most specific first
    pub response_selectors: &'static [&'static str],
    /// Visible while an answer is still streaming
    pub generating_markers: &'static [&'static str],
    /// Source/reference containers scanned before the default extractor
    pub citation_scopes: &'static [&'static str],
    /// Challenge overlays specific to this target
    pub captcha_selectors: &'static [&'static str],
}

impl TargetProfile {
    pub fn input_selectors(&self) -> Vec<&'static str> {
        self.input.iter().map(|s| s.selector()).collect()
    }
}

pub async fn any_exists(page: &dyn PageDriver, selectors: &[&str]) -> Result<bool, AdapterError> {
    for selector in selectors {
        if page.exists(selector).await? {
            return Ok(true);
        }
    }
    Ok(false)
}

pub async fn apply_input(
    page: &dyn PageDriver,
    profile: &TargetProfile,
    text: &str,
) -> Result<(), AdapterError> {
    for strategy in profile.input {
        if page
            .set_input(strategy.selector(), text, strategy.kind())
            .await?
        {
            tracing::debug!(target_id = %profile.id, selector = %strategy.selector(), "Query written");
            return Ok(());
        }
    }
    Err(AdapterError::ElementNotFound(format!(
        "{} input surface",
        profile.id
    )))
}

pub async fn apply_submit(page: &dyn PageDriver, profile: &TargetProfile) -> Result<(), AdapterError> {
    for strategy in profile.submit {
        match strategy {
            SubmitStrategy::Button(selector) => {
                if page.is_enabled(selector).await? && page.click(selector).await? {
                    return Ok(());
                }
            }
            SubmitStrategy::EnterKey => {
                for input in profile.input {
                    if page.press_enter(input.selector()).await? {
                        return Ok(());
                    }
                }
            }
        }
    }
    Err(AdapterError::ElementNotFound(format!(
        "{} submit control",
        profile.id
    )))
}

pub async fn apply_new_chat(
    page: &dyn PageDriver,
    profile: &TargetProfile,
) -> Result<(), AdapterError> {
    for strategy in profile.new_chat {
        match strategy {
            NewChatStrategy::Click(selector) => {
                if page.click(selector).await? {
                    return Ok(());
                }
            }
            NewChatStrategy::Navigate(url) => {
                page.navigate(url).await?;
                return Ok(());
            }
        }
    }
    // Reloading the entry point always yields a blank conversation
    page.navigate(profile.entry_url).await?;
    Ok(())
}
