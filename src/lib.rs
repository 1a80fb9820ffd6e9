//! Scriptorium - agent-orchestration daemon driving LLM coding agents
//! through a git-native planning and merge workflow.

pub mod assign;
pub mod commands;
pub mod config;
pub mod error;
pub mod git;
pub mod mcp;
pub mod orchestrator;
pub mod plan;
pub mod planner;
pub mod queue;
pub mod runner;
pub mod telemetry;
pub mod tickets;
