//! The tarsy daemon: chain/agent registries, configuration loading, the
//! runbook fetcher, audit and dashboard hook subscribers, the progress
//! stream, and the alert orchestrator.
//!
//! The HTTP/WebSocket edge and the LLM/MCP provider adapters are external
//! collaborators; they mount on [`service::AlertService`] and the trait
//! seams in `tarsy-agent` / `tarsy-mcp`.

pub mod config;
pub mod hooks;
pub mod progress;
pub mod registry;
pub mod runbook;
pub mod service;
pub mod shutdown;
pub mod telemetry;
