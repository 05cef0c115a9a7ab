//! JSON-RPC Server
//!
//! HTTP on localhost only; the daemon is controlled from the same machine.

use crate::handler::RpcHandler;
use citewatch_core::application::Orchestrator;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

pub const CONTROL_METHOD: &str = "control.v1";

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9537;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            config,
            handler: Arc::new(RpcHandler::new(orchestrator)),
        }
    }

    /// Bind and start serving. Returns the bound address (useful with port 0)
    /// and the handle that stops the server.
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let mut module = RpcModule::new(());

        let handler = self.handler.clone();
        module
            .register_async_method(CONTROL_METHOD, move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let raw: Value = params.parse()?;
                    handler.control(raw).await
                }
            })
            .map_err(|e| e.to_string())?;

        info!(addr = %local_addr, method = %CONTROL_METHOD, "JSON-RPC server started");

        let handle = server.start(module);
        Ok((local_addr, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::code;
    use citewatch_core::application::{
        AdapterRegistry, ControlReply, OrchestratorConfig, OrchestratorDeps, PlatformClients,
        RetryPolicy, SessionConfig, SessionManager, TaskQueue,
    };
    use citewatch_core::domain::{AgentState, Mode};
    use citewatch_core::port::id_provider::mocks::SequentialIdProvider;
    use citewatch_core::port::notifier::mocks::RecordingNotifier;
    use citewatch_core::port::page_driver::mocks::FixtureBrowser;
    use citewatch_core::port::platform::mocks::MockPlatform;
    use citewatch_core::port::queue_store::mocks::InMemoryQueueStore;
    use citewatch_core::port::scheduler::mocks::InMemoryScheduler;
    use citewatch_core::port::state_store::mocks::InMemoryStateStore;
    use citewatch_core::port::time_provider::mocks::MockTimeProvider;
    use jsonrpsee::core::client::ClientT;
    use jsonrpsee::core::ClientError;
    use jsonrpsee::core::params::ObjectParams;
    use jsonrpsee::http_client::HttpClientBuilder;
    use serde_json::json;

    fn orchestrator() -> Arc<Orchestrator> {
        let clock = Arc::new(MockTimeProvider::new(1_767_225_600_000));
        let queue = Arc::new(TaskQueue::new(
            Arc::new(InMemoryQueueStore::new()),
            clock.clone(),
            RetryPolicy::default(),
        ));
        let sessions = Arc::new(SessionManager::new(
            Arc::new(FixtureBrowser::new()),
            Arc::new(AdapterRegistry::with_defaults()),
            clock.clone(),
            SessionConfig::default(),
        ));
        Orchestrator::new(
            OrchestratorDeps {
                queue,
                sessions,
                state_store: Arc::new(InMemoryStateStore::with_state(AgentState::default())),
                scheduler: Arc::new(InMemoryScheduler::new()),
                platform: PlatformClients::from_client(Arc::new(MockPlatform::new())),
                notifier: Arc::new(RecordingNotifier::new()),
                clock,
                ids: Arc::new(SequentialIdProvider::new("manual")),
            },
            OrchestratorConfig {
                version: "9.9.9".to_string(),
                ..Default::default()
            },
        )
    }

    async fn serve() -> (String, ServerHandle) {
        let config = RpcServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        let (addr, handle) = RpcServer::new(config, orchestrator()).start().await.unwrap();
        (format!("http://{}", addr), handle)
    }

    fn envelope(kind: &str, payload: Option<serde_json::Value>) -> ObjectParams {
        let mut params = ObjectParams::new();
        params.insert("type", kind).unwrap();
        if let Some(payload) = payload {
            params.insert("payload", payload).unwrap();
        }
        params
    }

    #[tokio::test]
    async fn test_ping_over_http() {
        let (url, handle) = serve().await;
        let client = HttpClientBuilder::default().build(&url).unwrap();

        let reply: ControlReply = client
            .request(CONTROL_METHOD, envelope("PING", None))
            .await
            .unwrap();
        assert_eq!(
            reply,
            ControlReply::Pong {
                version: "9.9.9".to_string(),
                mode: Mode::Idle,
            }
        );
        handle.stop().unwrap();
    }

    #[tokio::test]
    async fn test_mode_toggle_and_status() {
        let (url, handle) = serve().await;
        let client = HttpClientBuilder::default().build(&url).unwrap();

        let reply: serde_json::Value = client
            .request(
                CONTROL_METHOD,
                envelope("STATUS_UPDATE", Some(json!({"mode": "active"}))),
            )
            .await
            .unwrap();
        assert_eq!(reply["type"], "MODE_CHANGED");
        assert_eq!(reply["payload"]["mode"], "active");

        let status: serde_json::Value = client
            .request(CONTROL_METHOD, envelope("GET_STATUS", None))
            .await
            .unwrap();
        assert_eq!(status["type"], "STATUS");
        assert_eq!(status["payload"]["state"]["mode"], "active");
        assert!(status["payload"]["supportedTargets"]
            .as_array()
            .unwrap()
            .iter()
            .any(|t| t == "perplexity"));
        handle.stop().unwrap();
    }

    #[tokio::test]
    async fn test_errors_carry_codes() {
        let (url, handle) = serve().await;
        let client = HttpClientBuilder::default().build(&url).unwrap();

        let err = client
            .request::<serde_json::Value, _>(
                CONTROL_METHOD,
                envelope("CHECK_LOGIN", Some(json!({"targetId": "altavista"}))),
            )
            .await
            .unwrap_err();
        match err {
            ClientError::Call(e) => assert_eq!(e.code(), code::NOT_FOUND),
            other => panic!("unexpected {:?}", other),
        }

        let err = client
            .request::<serde_json::Value, _>(CONTROL_METHOD, envelope("REBOOT", None))
            .await
            .unwrap_err();
        match err {
            ClientError::Call(e) => assert_eq!(e.code(), code::VALIDATION_ERROR),
            other => panic!("unexpected {:?}", other),
        }
        handle.stop().unwrap();
    }
}
