// Citewatch Infrastructure - Platform API Client
// Implements: TaskSource, ResultSink, HeartbeatSink

pub mod client;

pub use client::{HttpPlatformClient, PlatformConfig};
