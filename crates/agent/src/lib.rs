//! Agent runtime for the Slack bot.
//!
//! This crate turns a chat message into an LLM-backed reply:
//! - `backend` selects the model backend (proxy, Azure, or direct) once per process
//! - `session` owns the main agent, its summary delegate, tool servers and history
//! - `runner` drives the tool-call / handoff loop against an [`llm::LlmClient`]
//! - `runtime` keeps one session per conversation
//!
//! # Delegation
//!
//! The main agent may call local tools, tools advertised by connected tool
//! servers, or hand off to the summary agent. The summary agent never calls
//! tools and must answer with a `{"summary": ...}` object.

pub mod agent;
pub mod backend;
pub mod error;
pub mod history;
pub mod llm;
pub mod openai;
pub mod runner;
pub mod runtime;
pub mod servers;
pub mod session;
pub mod summary;
pub mod tools;
pub mod web;

#[cfg(test)]
mod testing;

pub use backend::{resolve_backend, resolve_model_settings, BackendMode, ProcessEnv, ResolvedBackend};
pub use error::AgentError;
pub use runtime::{AgentRuntime, ConfiguredSessionFactory, SessionFactory};
pub use session::{CleanupReport, ConnectReport, Session, SessionOptions};
