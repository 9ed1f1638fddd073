//! agentloop: run-loop driver for hosted agents with tool-call approval
//!
//! This library provides:
//! - A polling run-loop driver that gates pending tool calls through an
//!   approval policy before resuming a run
//! - A typed client for the hosted agent service
//! - Toy tool providers (inventory, lights, GitHub)
//! - A line-oriented JSON-RPC tool protocol (client and stdio server)
//! - A chat-completions client with automatic tool invocation

pub mod agents;
pub mod config;
pub mod github;
pub mod llm;
pub mod mcp;
pub mod runloop;
pub mod tools;
pub mod transport;

pub use config::{EnvConfig, Settings};
pub use runloop::{ApprovalPolicy, RunLoopDriver, RunLoopOptions};
