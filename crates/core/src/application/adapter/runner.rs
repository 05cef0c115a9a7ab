// Adapter state machine driver
//
// NotReady -> Ready -> AuthChecked -> SessionReset -> InputSet -> Submitted
//   -> Waiting -> Extracted -> Done, or Failed(reason) from anywhere.

use super::waiter::{self, WaitConfig};
use super::{AdapterError, AdapterState, TargetAdapter};
use crate::application::constants::{TAB_READY_POLL_INTERVAL, TAB_READY_TIMEOUT};
use crate::domain::Citation;
use crate::port::PageDriver;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    pub ready_timeout: Duration,
    pub ready_poll_interval: Duration,
    pub wait: WaitConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ready_timeout: TAB_READY_TIMEOUT,
            ready_poll_interval: TAB_READY_POLL_INTERVAL,
            wait: WaitConfig::default(),
        }
    }
}

/// Harvested answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub response_text: String,
    pub citations: Vec<Citation>,
    /// False when the waiter gave up and the text may be partial
    pub completed: bool,
}

/// Poll `is_ready` until it holds or `timeout` passes
pub async fn wait_until_ready<A>(
    adapter: &A,
    page: &dyn PageDriver,
    timeout: Duration,
    interval: Duration,
) -> Result<bool, AdapterError>
where
    A: TargetAdapter + ?Sized,
{
    let deadline = Instant::now() + timeout;
    loop {
        if adapter.is_ready(page).await? {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(interval).await;
    }
}

/// One pass of an adapter over one page
pub struct AdapterRun<'a> {
    adapter: &'a dyn TargetAdapter,
    page: &'a dyn PageDriver,
    config: RunConfig,
    state: AdapterState,
}

impl<'a> AdapterRun<'a> {
    pub fn new(adapter: &'a dyn TargetAdapter, page: &'a dyn PageDriver, config: RunConfig) -> Self {
        Self {
            adapter,
            page,
            config,
            state: AdapterState::NotReady,
        }
    }

    pub fn state(&self) -> &AdapterState {
        &self.state
    }

    fn advance(&mut self, to: AdapterState) -> Result<(), AdapterError> {
        if !self.state.can_transition_to(&to) {
            return Err(AdapterError::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        debug!(target_id = %self.adapter.id(), from = %self.state, to = %to, "Adapter transition");
        self.state = to;
        Ok(())
    }

    /// Submit `query` and harvest the answer
    pub async fn execute(&mut self, query: &str) -> Result<Answer, AdapterError> {
        match self.drive(query).await {
            Ok(answer) => Ok(answer),
            Err(e) => {
                if !self.state.is_terminal() {
                    self.state = AdapterState::Failed(e.to_string());
                }
                Err(e)
            }
        }
    }

    async fn drive(&mut self, query: &str) -> Result<Answer, AdapterError> {
        let adapter = self.adapter;
        let page = self.page;

        waiter::preflight(adapter, page).await?;
        if !adapter.is_ready(page).await? {
            return Err(AdapterError::ElementNotFound(format!(
                "{} input surface",
                adapter.id()
            )));
        }
        self.advance(AdapterState::Ready)?;

        waiter::preflight(adapter, page).await?;
        if !adapter.is_logged_in(page).await? {
            return Err(AdapterError::LoginRequired(format!(
                "{} has no signed-in session",
                adapter.id()
            )));
        }
        self.advance(AdapterState::AuthChecked)?;

        waiter::preflight(adapter, page).await?;
        adapter.start_new_chat(page).await?;
        if !wait_until_ready(
            adapter,
            page,
            self.config.ready_timeout,
            self.config.ready_poll_interval,
        )
        .await?
        {
            return Err(AdapterError::ElementNotFound(format!(
                "{} input surface after new chat",
                adapter.id()
            )));
        }
        self.advance(AdapterState::SessionReset)?;

        waiter::preflight(adapter, page).await?;
        adapter.input_query(page, query).await?;
        self.advance(AdapterState::InputSet)?;

        waiter::preflight(adapter, page).await?;
        adapter.submit_query(page).await?;
        self.advance(AdapterState::Submitted)?;

        self.advance(AdapterState::Waiting)?;
        let outcome = adapter.wait_for_response(page, &self.config.wait).await?;

        let response_text = match adapter.extract_response(page).await {
            Ok(text) => text,
            Err(AdapterError::ElementNotFound(_)) if !outcome.completed => {
                return Err(AdapterError::Timeout(format!(
                    "{} produced no answer within {:?}",
                    adapter.id(),
                    self.config.wait.timeout
                )));
            }
            Err(e) => return Err(e),
        };
        self.advance(AdapterState::Extracted)?;

        let citations = adapter.extract_citations(page).await?;
        self.advance(AdapterState::Done)?;

        info!(
            target_id = %adapter.id(),
            chars = %response_text.chars().count(),
            citations = %citations.len(),
            completed = %outcome.completed,
            "Answer extracted"
        );
        Ok(Answer {
            response_text,
            citations,
            completed: outcome.completed,
        })
    }
}

/// Harvest whatever conversation the page shows, without input
pub async fn capture(
    adapter: &dyn TargetAdapter,
    page: &dyn PageDriver,
) -> Result<Answer, AdapterError> {
    waiter::preflight(adapter, page).await?;
    let response_text = adapter.extract_response(page).await?;
    let citations = adapter.extract_citations(page).await?;
    Ok(Answer {
        response_text,
        citations,
        completed: !adapter.is_generating(page).await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::adapter::strategy::{
        InputStrategy, NewChatStrategy, SubmitStrategy, TargetProfile,
    };
    use crate::port::page_driver::mocks::FixturePage;
    use crate::port::LinkInfo;

    const PROFILE: TargetProfile = TargetProfile {
        id: "fixture",
        entry_url: "https://chat.example.com/",
        host: "chat.example.com",
        input: &[InputStrategy::Plain("textarea")],
        submit: &[SubmitStrategy::Button("button.send"), SubmitStrategy::EnterKey],
        new_chat: &[NewChatStrategy::Navigate("https://chat.example.com/new")],
        login_markers: &["img.avatar"],
        logged_out_markers: &["button.login"],
        response_selectors: &[".answer"],
        generating_markers: &[".stop"],
        citation_scopes: &[],
        captcha_selectors: &[],
    };

    struct Fixture;

    impl TargetAdapter for Fixture {
        fn profile(&self) -> &TargetProfile {
            &PROFILE
        }
    }

    fn config() -> RunConfig {
        RunConfig {
            ready_timeout: Duration::from_millis(50),
            ready_poll_interval: Duration::from_millis(5),
            wait: WaitConfig {
                poll_interval: Duration::from_millis(5),
                stable_polls: 3,
                min_chars: 50,
                timeout: Duration::from_secs(5),
            },
        }
    }

    fn ready_page() -> FixturePage {
        FixturePage::new("t", PROFILE.entry_url)
            .with_element("textarea")
            .with_element("button.send")
            .with_element("img.avatar")
            .with_element(".stop")
    }

    #[tokio::test]
    async fn test_full_run_reaches_done() {
        let answer = "a".repeat(64);
        let page = ready_page()
            .with_text_frames(".answer", [answer.clone()])
            .with_links(
                ".answer",
                vec![
                    LinkInfo::new("https://en.wikipedia.org/wiki/Rust", "Rust"),
                    LinkInfo::new("https://chat.example.com/share/1", "self"),
                ],
            );

        let mut run = AdapterRun::new(&Fixture, &page, config());
        let result = run.execute("what is rust").await.unwrap();

        assert_eq!(run.state(), &AdapterState::Done);
        assert_eq!(result.response_text, answer);
        assert!(result.completed);
        assert_eq!(result.citations.len(), 1);
        assert_eq!(result.citations[0].domain, "en.wikipedia.org");
        assert_eq!(page.navigations(), vec!["https://chat.example.com/new".to_string()]);
        assert_eq!(page.clicks(), vec!["button.send".to_string()]);
    }

    #[tokio::test]
    async fn test_captcha_aborts_before_input() {
        let page = ready_page().with_element(".cf-turnstile");

        let mut run = AdapterRun::new(&Fixture, &page, config());
        let err = run.execute("q").await.unwrap_err();

        assert!(matches!(err, AdapterError::CaptchaDetected(_)));
        assert!(matches!(run.state(), AdapterState::Failed(_)));
        assert!(page.inputs().is_empty());
        assert!(page.clicks().is_empty());
    }

    #[tokio::test]
    async fn test_logged_out_is_login_required() {
        let page = ready_page().with_element("button.login");
        let mut run = AdapterRun::new(&Fixture, &page, config());
        let err = run.execute("q").await.unwrap_err();
        assert!(matches!(err, AdapterError::LoginRequired(_)));
        assert!(page.inputs().is_empty());
    }

    #[tokio::test]
    async fn test_no_answer_before_wait_timeout_is_timeout() {
        let page = ready_page();
        let mut cfg = config();
        cfg.wait.timeout = Duration::from_millis(30);

        let mut run = AdapterRun::new(&Fixture, &page, cfg);
        let err = run.execute("q").await.unwrap_err();
        assert!(matches!(err, AdapterError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_capture_reads_without_input() {
        let page = ready_page().with_text_frames(".answer", ["existing answer"]);
        let answer = capture(&Fixture, &page).await.unwrap();
        assert_eq!(answer.response_text, "existing answer");
        assert!(page.inputs().is_empty());
    }
}
