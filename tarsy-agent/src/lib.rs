//! Agent runtime and iteration controllers.
//!
//! An agent is stateless data (assigned MCP servers, custom instructions, a
//! default iteration strategy); this crate turns that data plus an LLM and
//! an MCP broker into one completed stage. The iteration controllers drive
//! bounded cooperative loops around the LLM; the runtime assembles context,
//! resolves the effective strategy, and packages the outcome as a
//! `StageResult` that never crosses the stage boundary as an error.

pub mod catalog;
pub mod controller;
pub mod llm;
pub mod prompt;
pub mod react;
pub mod runtime;
