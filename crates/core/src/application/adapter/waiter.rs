// Stability-based response waiter
//
// Completion does not depend on any target's own "done" signal:
//   (a) text length unchanged for `stable_polls` consecutive polls and above
//       `min_chars`, or
//   (b) from the second poll on, no generation indicator and length above
//       `min_chars`.
// A hard timeout yields a best-effort, not-completed outcome.

use super::{AdapterError, TargetAdapter};
use crate::application::constants::{
    MIN_RESPONSE_CHARS, RESPONSE_POLL_INTERVAL, RESPONSE_TIMEOUT, STABLE_POLLS_REQUIRED,
};
use crate::port::PageDriver;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    pub poll_interval: Duration,
    pub stable_polls: u32,
    pub min_chars: usize,
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval: RESPONSE_POLL_INTERVAL,
            stable_polls: STABLE_POLLS_REQUIRED,
            min_chars: MIN_RESPONSE_CHARS,
            timeout: RESPONSE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOutcome {
    pub completed: bool,
    /// Polls taken, including the completing one
    pub polls: u32,
    /// Characters in the response region at the last poll
    pub length: usize,
}

/// Run the pre-flight checks; any hit aborts the task
pub async fn preflight<A>(adapter: &A, page: &dyn PageDriver) -> Result<(), AdapterError>
where
    A: TargetAdapter + ?Sized,
{
    if let Some(marker) = adapter.detect_captcha(page).await? {
        return Err(AdapterError::CaptchaDetected(format!(
            "{} shows {}",
            adapter.id(),
            marker
        )));
    }
    if let Some(marker) = adapter.detect_network_error(page).await? {
        return Err(AdapterError::NetworkError(format!(
            "{} shows {}",
            adapter.id(),
            marker
        )));
    }
    Ok(())
}

pub async fn wait_for_stable_response<A>(
    adapter: &A,
    page: &dyn PageDriver,
    config: &WaitConfig,
) -> Result<WaitOutcome, AdapterError>
where
    A: TargetAdapter + ?Sized,
{
    let deadline = Instant::now() + config.timeout;
    let mut polls: u32 = 0;
    let mut last_len: Option<usize> = None;
    let mut run: u32 = 0;

    loop {
        tokio::time::sleep(config.poll_interval).await;
        polls += 1;

        preflight(adapter, page).await?;

        let length = adapter
            .response_text(page)
            .await?
            .map(|t| t.trim().chars().count())
            .unwrap_or(0);

        run = if last_len == Some(length) { run + 1 } else { 1 };
        last_len = Some(length);

        let long_enough = length > config.min_chars;
        let stable = run >= config.stable_polls && long_enough;
        let idle = polls >= 2 && long_enough && !adapter.is_generating(page).await?;

        debug!(
            target_id = %adapter.id(),
            poll = %polls,
            length = %length,
            run = %run,
            "Response poll"
        );

        if stable || idle {
            return Ok(WaitOutcome {
                completed: true,
                polls,
                length,
            });
        }

        if Instant::now() >= deadline {
            warn!(
                target_id = %adapter.id(),
                polls = %polls,
                length = %length,
                "Response wait timed out, continuing with partial text"
            );
            return Ok(WaitOutcome {
                completed: false,
                polls,
                length,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::adapter::strategy::{InputStrategy, SubmitStrategy, TargetProfile};
    use crate::port::page_driver::mocks::FixturePage;

    const PROFILE: TargetProfile = TargetProfile {
        id: "fixture",
        entry_url: "https://chat.example.com/",
        host: "chat.example.com",
        input: &[InputStrategy::Plain("textarea")],
        submit: &[SubmitStrategy::EnterKey],
        new_chat: &[],
        login_markers: &[],
        logged_out_markers: &[],
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

    fn fast() -> WaitConfig {
        WaitConfig {
            poll_interval: Duration::from_millis(5),
            stable_polls: 3,
            min_chars: 50,
            timeout: Duration::from_secs(5),
        }
    }

    fn text(n: usize) -> String {
        "x".repeat(n)
    }

    #[tokio::test]
    async fn test_completes_after_n_stable_polls() {
        // changes for k = 2 polls, then holds; indicator never goes away
        let page = FixturePage::new("t", PROFILE.entry_url)
            .with_element(".stop")
            .with_text_frames(".answer", [text(60), text(80)]);

        let outcome = wait_for_stable_response(&Fixture, &page, &fast())
            .await
            .unwrap();
        assert!(outcome.completed);
        // stable run starts at poll 2, third identical poll is poll 4
        assert_eq!(outcome.polls, 4);
        assert!(outcome.polls >= fast().stable_polls);
        assert_eq!(outcome.length, 80);
    }

    #[tokio::test]
    async fn test_short_text_never_completes_on_stability() {
        let page = FixturePage::new("t", PROFILE.entry_url)
            .with_element(".stop")
            .with_text_frames(".answer", [text(10)]);

        let config = WaitConfig {
            timeout: Duration::from_millis(60),
            ..fast()
        };
        let outcome = wait_for_stable_response(&Fixture, &page, &config)
            .await
            .unwrap();
        assert!(!outcome.completed);
        assert_eq!(outcome.length, 10);
    }

    #[tokio::test]
    async fn test_indicator_gone_completes_from_second_poll() {
        let page = FixturePage::new("t", PROFILE.entry_url)
            .with_text_frames(".answer", [text(70), text(90), text(120), text(150)]);

        let outcome = wait_for_stable_response(&Fixture, &page, &fast())
            .await
            .unwrap();
        assert!(outcome.completed);
        assert_eq!(outcome.polls, 2);
    }

    #[tokio::test]
    async fn test_captcha_mid_wait_aborts() {
        let page = FixturePage::new("t", PROFILE.entry_url)
            .with_element(".stop")
            .with_iframe("https://hcaptcha.com/checkbox")
            .with_text_frames(".answer", [text(70)]);

        let err = wait_for_stable_response(&Fixture, &page, &fast())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::CaptchaDetected(_)));
    }
}
