// Platform API over HTTPS with a bearer token
//
// GET  {base}/api/crawler/tasks/pending  -> {tasks: [WorkItem]}
// POST {base}/api/crawler/results        {results: [..]} -> {accepted, acceptedIds?}
// POST {base}/api/crawler/heartbeat      Heartbeat

use async_trait::async_trait;
use citewatch_core::domain::{TaskResult, WorkItem};
use citewatch_core::port::{
    Heartbeat, HeartbeatSink, PlatformError, ResultSink, SubmitAck, TaskSource,
};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TASKS_PATH: &str = "/api/crawler/tasks/pending";
const RESULTS_PATH: &str = "/api/crawler/results";
const HEARTBEAT_PATH: &str = "/api/crawler/heartbeat";

#[derive(Debug, Clone, Default)]
pub struct PlatformConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
}

#[derive(Deserialize)]
struct PendingResponse {
    #[serde(default)]
    tasks: Vec<Value>,
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    results: &'a [TaskResult],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    #[serde(default)]
    accepted: usize,
    #[serde(default)]
    accepted_ids: Option<Vec<String>>,
}

impl From<SubmitResponse> for SubmitAck {
    fn from(resp: SubmitResponse) -> Self {
        match resp.accepted_ids {
            Some(ids) => SubmitAck::Ids(ids),
            None => SubmitAck::Count(resp.accepted),
        }
    }
}

pub struct HttpPlatformClient {
    http: reqwest::Client,
    base_url: Option<String>,
    token: Option<String>,
}

impl HttpPlatformClient {
    pub fn new(config: PlatformConfig) -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PlatformError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config
                .base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
            token: config.token.filter(|t| !t.is_empty()),
        })
    }

    fn url(&self, path: &str) -> Result<String, PlatformError> {
        match &self.base_url {
            Some(base) => Ok(format!("{}{}", base, path)),
            None => Err(PlatformError::NotConfigured("API base URL".to_string())),
        }
    }

    fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, PlatformError> {
        match &self.token {
            Some(token) => Ok(request.bearer_auth(token)),
            // Without a token every call would be a 401
            None => Err(PlatformError::Unauthorized),
        }
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, PlatformError> {
        let response = self
            .authorize(request)?
            .send()
            .await
            .map_err(|e| PlatformError::Network(e.to_string()))?;
        check_status(response).await
    }
}

async fn check_status(response: Response) -> Result<Response, PlatformError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(PlatformError::Unauthorized);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PlatformError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

/// Keep the well-formed items; one bad entry does not drop the batch
fn decode_tasks(raw: Vec<Value>) -> Vec<WorkItem> {
    raw.into_iter()
        .filter_map(|value| match serde_json::from_value::<WorkItem>(value) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(error = %e, "Skipping malformed task");
                None
            }
        })
        .collect()
}

#[async_trait]
impl TaskSource for HttpPlatformClient {
    async fn fetch_pending(&self) -> Result<Vec<WorkItem>, PlatformError> {
        let url = self.url(TASKS_PATH)?;
        let response = self.execute(self.http.get(&url)).await?;
        let body: PendingResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Decode(e.to_string()))?;
        let tasks = decode_tasks(body.tasks);
        debug!(count = %tasks.len(), "Fetched pending tasks");
        Ok(tasks)
    }
}

#[async_trait]
impl ResultSink for HttpPlatformClient {
    async fn submit(&self, results: &[TaskResult]) -> Result<SubmitAck, PlatformError> {
        let url = self.url(RESULTS_PATH)?;
        let request = self.http.post(&url).json(&SubmitRequest { results });
        let response = self.execute(request).await?;
        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Decode(e.to_string()))?;
        debug!(submitted = %results.len(), accepted = %body.accepted, "Results submitted");
        Ok(body.into())
    }
}

#[async_trait]
impl HeartbeatSink for HttpPlatformClient {
    async fn send(&self, heartbeat: &Heartbeat) -> Result<(), PlatformError> {
        let url = self.url(HEARTBEAT_PATH)?;
        self.execute(self.http.post(&url).json(heartbeat)).await?;
        Ok(())
    }
}
