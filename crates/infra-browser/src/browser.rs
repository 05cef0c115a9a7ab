// BrowserPort over a Chrome instance
//
// Target management goes through the browser-level endpoint; each tab gets
// its own CDP connection wrapped in a CdpPage.

use crate::cdp::CdpClient;
use crate::launcher::wait_for_cdp_ready;
use crate::page::CdpPage;
use async_trait::async_trait;
use citewatch_core::port::{BrowserPort, DriverError, PageDriver};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const TARGET_LOOKUP_ATTEMPTS: usize = 10;
const TARGET_LOOKUP_DELAY: Duration = Duration::from_millis(300);
const EXIT_GRACE: Duration = Duration::from_secs(5);

pub struct ChromeBrowser {
    port: u16,
    control: CdpClient,
    http: reqwest::Client,
    pages: Mutex<HashMap<String, Arc<CdpPage>>>,
    /// Present when this process launched the browser
    child: Mutex<Option<Child>>,
    pid: Option<u32>,
}

impl ChromeBrowser {
    /// Attach to a browser exposing CDP on `port`
    pub async fn connect(
        port: u16,
        child: Option<Child>,
        ready_timeout: Duration,
    ) -> Result<Self, DriverError> {
        let http = reqwest::Client::new();
        let ws_url = wait_for_cdp_ready(&http, port, ready_timeout).await?;
        let control = CdpClient::connect(&ws_url).await?;
        let pid = child.as_ref().and_then(Child::id);
        info!(port = %port, pid = ?pid, "Connected to browser");

        Ok(Self {
            port,
            control,
            http,
            pages: Mutex::new(HashMap::new()),
            child: Mutex::new(child),
            pid,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// OS pid of a browser this process launched
    pub fn pid(&self) -> Option<i32> {
        self.pid.map(|p| p as i32)
    }

    /// Per-tab WebSocket URL from /json/list. New targets can take a moment
    /// to show up there.
    async fn target_ws_url(&self, target_id: &str) -> Result<String, DriverError> {
        let url = format!("http://127.0.0.1:{}/json/list", self.port);
        for attempt in 0..TARGET_LOOKUP_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(TARGET_LOOKUP_DELAY).await;
            }
            let Ok(resp) = self.http.get(&url).send().await else {
                continue;
            };
            let Ok(targets) = resp.json::<Vec<Value>>().await else {
                continue;
            };
            if let Some(ws_url) = find_ws_url(&targets, target_id) {
                return Ok(ws_url);
            }
        }
        Err(DriverError::Connection(format!(
            "no WebSocket URL for target {}",
            target_id
        )))
    }

    /// Close the browser: politely over CDP, then by killing the process
    pub async fn shutdown(&self) {
        self.pages.lock().await.clear();
        if let Err(e) = self.control.send_command("Browser.close", json!({})).await {
            debug!(error = %e, "Browser.close failed");
        }

        let mut child = self.child.lock().await;
        if let Some(child) = child.as_mut() {
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => info!(status = %status, "Browser exited"),
                _ => {
                    warn!("Browser did not exit, killing it");
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to kill browser");
                    }
                }
            }
        }
        *child = None;
    }
}

fn find_ws_url(targets: &[Value], target_id: &str) -> Option<String> {
    targets
        .iter()
        .find(|t| {
            t.get("id").and_then(Value::as_str) == Some(target_id)
                || t.get("targetId").and_then(Value::as_str) == Some(target_id)
        })
        .and_then(|t| t.get("webSocketDebuggerUrl"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn page_target_ids(result: &Value) -> Vec<String> {
    result
        .get("targetInfos")
        .and_then(Value::as_array)
        .map(|infos| {
            infos
                .iter()
                .filter(|info| info.get("type").and_then(Value::as_str) == Some("page"))
                .filter_map(|info| info.get("targetId").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl BrowserPort for ChromeBrowser {
    async fn open_tab(&self, url: &str) -> Result<Arc<dyn PageDriver>, DriverError> {
        let created = self
            .control
            .send_command("Target.createTarget", json!({ "url": url }))
            .await?;
        let target_id = created
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Protocol("createTarget returned no targetId".to_string()))?
            .to_string();

        let ws_url = self.target_ws_url(&target_id).await?;
        let cdp = CdpClient::connect(&ws_url).await?;
        let page = Arc::new(CdpPage::attach(target_id.clone(), cdp).await?);
        page.wait_for_load().await?;

        self.pages
            .lock()
            .await
            .insert(target_id.clone(), Arc::clone(&page));
        debug!(tab_id = %target_id, url = %url, "Tab opened");
        Ok(page as Arc<dyn PageDriver>)
    }

    async fn close_tab(&self, tab_id: &str) -> Result<(), DriverError> {
        self.pages.lock().await.remove(tab_id);
        match self
            .control
            .send_command("Target.closeTarget", json!({ "targetId": tab_id }))
            .await
        {
            Ok(_) => {
                debug!(tab_id = %tab_id, "Tab closed");
                Ok(())
            }
            // Already gone
            Err(DriverError::Protocol(msg)) => {
                debug!(tab_id = %tab_id, reason = %msg, "Tab was not open");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn list_tabs(&self) -> Result<Vec<String>, DriverError> {
        let result = self
            .control
            .send_command("Target.getTargets", json!({}))
            .await?;
        let open = page_target_ids(&result);
        self.pages
            .lock()
            .await
            .retain(|id, page| open.contains(id) && !page.is_closed());
        Ok(open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url_lookup_by_id() {
        let targets = vec![
            json!({"id": "AAA", "type": "page", "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/AAA"}),
            json!({"id": "BBB", "type": "page", "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/BBB"}),
        ];
        assert_eq!(
            find_ws_url(&targets, "BBB").as_deref(),
            Some("ws://127.0.0.1:9222/devtools/page/BBB")
        );
        assert_eq!(find_ws_url(&targets, "CCC"), None);
    }

    #[test]
    fn test_only_page_targets_listed() {
        let result = json!({"targetInfos": [
            {"targetId": "P1", "type": "page", "url": "https://www.perplexity.ai/"},
            {"targetId": "W1", "type": "service_worker", "url": "https://x/sw.js"},
            {"targetId": "P2", "type": "page", "url": "about:blank"},
            {"targetId": "B1", "type": "browser"}
        ]});
        assert_eq!(page_target_ids(&result), vec!["P1", "P2"]);
        assert!(page_target_ids(&json!({})).is_empty());
    }
}
