// PageDriver over a per-tab CDP connection

use crate::cdp::CdpClient;
use crate::scripts;
use async_trait::async_trait;
use citewatch_core::port::{DriverError, InputKind, LinkInfo, PageDriver};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const LOAD_TIMEOUT: Duration = Duration::from_secs(30);
const LOAD_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Deserialize)]
struct RawLink {
    #[serde(default)]
    href: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    title: Option<String>,
}

impl From<RawLink> for LinkInfo {
    fn from(raw: RawLink) -> Self {
        LinkInfo {
            href: raw.href,
            text: raw.text,
            title: raw.title.filter(|t| !t.is_empty()),
        }
    }
}

pub struct CdpPage {
    tab_id: String,
    cdp: CdpClient,
}

impl CdpPage {
    /// Wrap a connected tab client and enable the domains the driver uses
    pub async fn attach(tab_id: impl Into<String>, cdp: CdpClient) -> Result<Self, DriverError> {
        cdp.enable_domain("Page").await?;
        cdp.enable_domain("Runtime").await?;
        Ok(Self {
            tab_id: tab_id.into(),
            cdp,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.cdp.is_closed()
    }

    async fn eval_bool(&self, script: &str) -> Result<bool, DriverError> {
        Ok(self.cdp.evaluate(script).await?.as_bool().unwrap_or(false))
    }

    async fn eval_string(&self, script: &str) -> Result<Option<String>, DriverError> {
        Ok(self.cdp.evaluate(script).await?.as_str().map(str::to_string))
    }

    /// Poll document.readyState until the load finishes. A page that keeps
    /// loading past the deadline is used as-is.
    pub(crate) async fn wait_for_load(&self) -> Result<(), DriverError> {
        let deadline = Instant::now() + LOAD_TIMEOUT;
        loop {
            let state = self.eval_string(scripts::READY_STATE).await?;
            if state.as_deref() == Some("complete") {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(tab_id = %self.tab_id, state = ?state, "Page still loading, continuing");
                return Ok(());
            }
            tokio::time::sleep(LOAD_POLL).await;
        }
    }
}

#[async_trait]
impl PageDriver for CdpPage {
    fn tab_id(&self) -> &str {
        &self.tab_id
    }

    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        debug!(tab_id = %self.tab_id, url = %url, "Navigating");
        let result = self
            .cdp
            .send_command("Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(error) = result.get("errorText").and_then(Value::as_str) {
            return Err(DriverError::Connection(format!("{}: {}", url, error)));
        }
        self.wait_for_load().await
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self
            .eval_string(scripts::CURRENT_URL)
            .await?
            .unwrap_or_default())
    }

    async fn exists(&self, selector: &str) -> Result<bool, DriverError> {
        self.eval_bool(&scripts::exists(selector)).await
    }

    async fn is_enabled(&self, selector: &str) -> Result<bool, DriverError> {
        self.eval_bool(&scripts::is_enabled(selector)).await
    }

    async fn text_of_last(&self, selector: &str) -> Result<Option<String>, DriverError> {
        self.eval_string(&scripts::text_of_last(selector)).await
    }

    async fn visible_text(&self, exclude: &[&str]) -> Result<String, DriverError> {
        Ok(self
            .eval_string(&scripts::visible_text(exclude))
            .await?
            .unwrap_or_default())
    }

    async fn links_within(&self, scope: &str) -> Result<Vec<LinkInfo>, DriverError> {
        let value = self.cdp.evaluate(&scripts::links_within(scope)).await?;
        let raw: Vec<RawLink> = serde_json::from_value(value)
            .map_err(|e| DriverError::Script(format!("unexpected link list: {}", e)))?;
        Ok(raw.into_iter().map(LinkInfo::from).collect())
    }

    async fn iframe_sources(&self) -> Result<Vec<String>, DriverError> {
        let value = self.cdp.evaluate(scripts::IFRAME_SOURCES).await?;
        serde_json::from_value(value)
            .map_err(|e| DriverError::Script(format!("unexpected iframe list: {}", e)))
    }

    async fn set_input(
        &self,
        selector: &str,
        text: &str,
        kind: InputKind,
    ) -> Result<bool, DriverError> {
        self.eval_bool(&scripts::set_input(selector, text, kind))
            .await
    }

    async fn click(&self, selector: &str) -> Result<bool, DriverError> {
        self.eval_bool(&scripts::click(selector)).await
    }

    async fn press_enter(&self, selector: &str) -> Result<bool, DriverError> {
        if !self.eval_bool(&scripts::focus(selector)).await? {
            return Ok(false);
        }
        self.cdp.press_key("Enter", "Enter", 13).await?;
        Ok(true)
    }
}
