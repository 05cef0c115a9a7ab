//! JSON-RPC API Layer
//!
//! Exposes the control surface as a single method, `control.v1`, whose
//! params are a `{type, payload}` control message.

pub mod error;
pub mod handler;
pub mod server;

pub use handler::RpcHandler;
pub use server::{RpcServer, RpcServerConfig, CONTROL_METHOD};
