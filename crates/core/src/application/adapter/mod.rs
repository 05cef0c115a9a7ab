// Target Adapter Protocol
//
// One fixed contract for every chat front-end. Targets are data
// (`TargetProfile`) plus the few methods they override.

pub mod citations;
pub mod detection;
pub mod registry;
pub mod runner;
pub mod strategy;
pub mod targets;
pub mod waiter;

pub use registry::AdapterRegistry;
pub use runner::{AdapterRun, Answer, RunConfig};
pub use strategy::{InputStrategy, NewChatStrategy, SubmitStrategy, TargetProfile};
pub use waiter::{WaitConfig, WaitOutcome};

use crate::domain::{Citation, FailureCategory};
use crate::port::{DriverError, PageDriver};
use async_trait::async_trait;
use thiserror::Error;

/// Per-task failure. Display strings lead with the category keyword so
/// `FailureCategory::classify` maps them back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("captcha detected: {0}")]
    CaptchaDetected(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("login required: {0}")]
    LoginRequired(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("unknown error: {0}")]
    UnknownError(String),

    #[error("unknown error: invalid adapter transition {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
}

impl AdapterError {
    pub fn category(&self) -> FailureCategory {
        match self {
            AdapterError::CaptchaDetected(_) => FailureCategory::Captcha,
            AdapterError::NetworkError(_) => FailureCategory::Network,
            AdapterError::LoginRequired(_) => FailureCategory::LoginRequired,
            AdapterError::ElementNotFound(_) | AdapterError::Timeout(_) => {
                FailureCategory::Timeout
            }
            AdapterError::UnknownError(_) | AdapterError::InvalidStateTransition { .. } => {
                FailureCategory::Unknown
            }
        }
    }
}

impl From<DriverError> for AdapterError {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::Connection(_) | DriverError::TabClosed(_) => {
                AdapterError::NetworkError(e.to_string())
            }
            DriverError::Timeout(_) => AdapterError::Timeout(e.to_string()),
            DriverError::Launch(_) | DriverError::Protocol(_) | DriverError::Script(_) => {
                AdapterError::UnknownError(e.to_string())
            }
        }
    }
}

/// Adapter run states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterState {
    NotReady,
    Ready,
    AuthChecked,
    SessionReset,
    InputSet,
    Submitted,
    Waiting,
    Extracted,
    Done,
    Failed(String),
}

impl AdapterState {
    pub fn name(&self) -> &'static str {
        match self {
            AdapterState::NotReady => "NotReady",
            AdapterState::Ready => "Ready",
            AdapterState::AuthChecked => "AuthChecked",
            AdapterState::SessionReset => "SessionReset",
            AdapterState::InputSet => "InputSet",
            AdapterState::Submitted => "Submitted",
            AdapterState::Waiting => "Waiting",
            AdapterState::Extracted => "Extracted",
            AdapterState::Done => "Done",
            AdapterState::Failed(_) => "Failed",
        }
    }

    /// The single legal forward step, if any
    fn successor(&self) -> Option<AdapterState> {
        Some(match self {
            AdapterState::NotReady => AdapterState::Ready,
            AdapterState::Ready => AdapterState::AuthChecked,
            AdapterState::AuthChecked => AdapterState::SessionReset,
            AdapterState::SessionReset => AdapterState::InputSet,
            AdapterState::InputSet => AdapterState::Submitted,
            AdapterState::Submitted => AdapterState::Waiting,
            AdapterState::Waiting => AdapterState::Extracted,
            AdapterState::Extracted => AdapterState::Done,
            AdapterState::Done | AdapterState::Failed(_) => return None,
        })
    }

    /// Forward one step, or to Failed from any non-terminal state
    pub fn can_transition_to(&self, to: &AdapterState) -> bool {
        match to {
            AdapterState::Failed(_) => !self.is_terminal(),
            _ => self.successor().as_ref() == Some(to),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AdapterState::Done | AdapterState::Failed(_))
    }
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterState::Failed(reason) => write!(f, "Failed({})", reason),
            other => f.write_str(other.name()),
        }
    }
}

/// The fixed per-target contract. Every method has a table-driven default
/// over `profile()`; targets override only where their page needs it.
#[async_trait]
pub trait TargetAdapter: Send + Sync {
    fn profile(&self) -> &TargetProfile;

    fn id(&self) -> &str {
        self.profile().id
    }

    fn entry_url(&self) -> &str {
        self.profile().entry_url
    }

    /// Input surface exists
    async fn is_ready(&self, page: &dyn PageDriver) -> Result<bool, AdapterError> {
        strategy::any_exists(page, &self.profile().input_selectors()).await
    }

    /// Authenticated-session indicator present (and no logged-out marker)
    async fn is_logged_in(&self, page: &dyn PageDriver) -> Result<bool, AdapterError> {
        let profile = self.profile();
        if strategy::any_exists(page, profile.logged_out_markers).await? {
            return Ok(false);
        }
        if profile.login_markers.is_empty() {
            return Ok(true);
        }
        strategy::any_exists(page, profile.login_markers).await
    }

    async fn start_new_chat(&self, page: &dyn PageDriver) -> Result<(), AdapterError> {
        strategy::apply_new_chat(page, self.profile()).await
    }

    async fn input_query(&self, page: &dyn PageDriver, text: &str) -> Result<(), AdapterError> {
        strategy::apply_input(page, self.profile(), text).await
    }

    async fn submit_query(&self, page: &dyn PageDriver) -> Result<(), AdapterError> {
        strategy::apply_submit(page, self.profile()).await
    }

    async fn wait_for_response(
        &self,
        page: &dyn PageDriver,
        config: &WaitConfig,
    ) -> Result<WaitOutcome, AdapterError> {
        waiter::wait_for_stable_response(self, page, config).await
    }

    /// Raw text of the last answer region, if one is rendered
    async fn response_text(&self, page: &dyn PageDriver) -> Result<Option<String>, AdapterError> {
        for selector in self.profile().response_selectors {
            if let Some(text) = page.text_of_last(selector).await? {
                if !text.trim().is_empty() {
                    return Ok(Some(text));
                }
            }
        }
        Ok(None)
    }

    /// A stop button, spinner or streaming cursor is visible
    async fn is_generating(&self, page: &dyn PageDriver) -> Result<bool, AdapterError> {
        strategy::any_exists(page, self.profile().generating_markers).await
    }

    /// Strip page chrome that leaks into the answer text
    fn clean_response(&self, raw: &str) -> String {
        raw.trim().to_string()
    }

    async fn extract_response(&self, page: &dyn PageDriver) -> Result<String, AdapterError> {
        match self.response_text(page).await? {
            Some(raw) => Ok(self.clean_response(&raw)),
            None => Err(AdapterError::ElementNotFound(format!(
                "{} response region",
                self.id()
            ))),
        }
    }

    /// Target-specific link scan, then the shared extractor if it found nothing
    async fn extract_citations(&self, page: &dyn PageDriver) -> Result<Vec<Citation>, AdapterError> {
        let profile = self.profile();
        for scope in profile.citation_scopes {
            let links = page.links_within(scope).await?;
            let citations = citations::build_citations(&links, Some(profile.host));
            if !citations.is_empty() {
                return Ok(citations);
            }
        }
        Ok(citations::default_extract(page, profile.response_selectors, profile.host).await?)
    }

    /// Challenge page, overlay or provider iframe present. The answer region is
    /// left out of the phrase scan.
    async fn detect_captcha(&self, page: &dyn PageDriver) -> Result<Option<String>, AdapterError> {
        let profile = self.profile();
        Ok(
            detection::detect_captcha(page, profile.captcha_selectors, profile.response_selectors)
                .await?,
        )
    }

    async fn detect_network_error(
        &self,
        page: &dyn PageDriver,
    ) -> Result<Option<String>, AdapterError> {
        Ok(detection::detect_network_error(page, self.profile().response_selectors).await?)
    }
}
