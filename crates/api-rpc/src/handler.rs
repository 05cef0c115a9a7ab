//! RPC Method Handlers

use crate::error::{invalid_params, to_rpc_error};
use citewatch_core::application::{ControlMessage, ControlReply, Orchestrator};
use jsonrpsee::types::ErrorObjectOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    orchestrator: Arc<Orchestrator>,
}

impl RpcHandler {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// control.v1
    pub async fn control(&self, params: Value) -> Result<ControlReply, ErrorObjectOwned> {
        let message = parse_message(params)?;
        self.orchestrator
            .handle_control(message)
            .await
            .map_err(|e| {
                warn!(error = %e, "Control message failed");
                to_rpc_error(e)
            })
    }
}

/// Accepts the envelope by name (`{type, payload}`) or as the only
/// positional parameter (`[{type, payload}]`)
pub(crate) fn parse_message(params: Value) -> Result<ControlMessage, ErrorObjectOwned> {
    let envelope = match params {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        Value::Array(_) => return Err(invalid_params("expected exactly one control message")),
        other => other,
    };
    serde_json::from_value(envelope)
        .map_err(|e| invalid_params(format!("invalid control message: {}", e)))
}
