// Chrome discovery and launch
//
// The automation browser runs with its own profile directory so logins
// made by the user in headed mode persist across daemon restarts.

use crate::browser::ChromeBrowser;
use citewatch_core::port::DriverError;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info};

const CDP_READY_TIMEOUT: Duration = Duration::from_secs(20);
const CDP_READY_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Explicit binary; auto-detected when None
    pub binary: Option<PathBuf>,
    pub profile_dir: PathBuf,
    pub headed: bool,
}

impl BrowserConfig {
    pub fn new(profile_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: None,
            profile_dir: profile_dir.into(),
            headed: false,
        }
    }
}

/// First Chrome/Chromium binary found on this machine
pub fn find_browser_binary() -> Option<PathBuf> {
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    } else {
        &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    };

    for candidate in candidates {
        let path = Path::new(candidate);
        if path.is_absolute() {
            if path.exists() {
                return Some(path.to_path_buf());
            }
        } else if let Ok(found) = which::which(candidate) {
            return Some(found);
        }
    }
    None
}

pub(crate) fn build_browser_args(debug_port: u16, profile_dir: &Path, headed: bool) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", profile_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--password-store=basic".to_string(),
        // Background tabs must keep rendering while an answer streams
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
    ];
    if !headed {
        args.push("--headless=new".to_string());
    }
    args.push("about:blank".to_string());
    args
}

async fn find_free_port() -> Result<u16, DriverError> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| DriverError::Launch(format!("no free port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| DriverError::Launch(format!("no free port: {}", e)))?
        .port();
    Ok(port)
}

/// Poll /json/version until the browser-level WebSocket URL is published
pub(crate) async fn wait_for_cdp_ready(
    http: &reqwest::Client,
    port: u16,
    timeout: Duration,
) -> Result<String, DriverError> {
    let url = format!("http://127.0.0.1:{}/json/version", port);
    let deadline = Instant::now() + timeout;

    loop {
        if let Ok(resp) = http.get(&url).send().await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(Value::as_str) {
                    return Ok(ws_url.to_string());
                }
            }
        }
        if Instant::now() >= deadline {
            return Err(DriverError::Launch(format!(
                "CDP endpoint not ready after {}s on port {}",
                timeout.as_secs(),
                port
            )));
        }
        tokio::time::sleep(CDP_READY_POLL).await;
    }
}

pub struct ChromeLauncher {
    config: BrowserConfig,
}

impl ChromeLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }

    pub async fn launch(&self) -> Result<ChromeBrowser, DriverError> {
        let binary = match &self.config.binary {
            Some(path) => path.clone(),
            None => find_browser_binary()
                .ok_or_else(|| DriverError::Launch("no Chrome or Chromium found".to_string()))?,
        };
        std::fs::create_dir_all(&self.config.profile_dir).map_err(|e| {
            DriverError::Launch(format!(
                "profile dir {}: {}",
                self.config.profile_dir.display(),
                e
            ))
        })?;

        let port = find_free_port().await?;
        let args = build_browser_args(port, &self.config.profile_dir, self.config.headed);
        debug!(binary = %binary.display(), args = ?args, "Launching browser");

        let child = Command::new(&binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DriverError::Launch(format!("{}: {}", binary.display(), e)))?;

        info!(
            pid = ?child.id(),
            port = %port,
            headed = %self.config.headed,
            "Browser launched"
        );
        ChromeBrowser::connect(port, Some(child), CDP_READY_TIMEOUT).await
    }
}
