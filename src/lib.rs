//! # PromptGate
//!
//! **Policy-enforcing security proxy for LLM provider traffic.**
//!
//! PromptGate sits between a client and an LLM provider (OpenAI- or
//! Gemini-compatible) and evaluates security policies at every checkpoint of
//! the traffic lifecycle: outgoing prompts, declared tool definitions,
//! model-issued tool calls, tool results, and the model's response —
//! including streamed responses, which are buffered and re-checked so no
//! unvetted content ever reaches the client.
//!
//! ## Architecture
//!
//! - **[`policy`]** — verdict/decision model, pluggable policies, and the
//!   Security Manager composing them into one decision per checkpoint
//! - **[`detect`]** — entity detector seam (the NLP/PII model is external)
//!   plus a regex reference detector
//! - **[`proxy`]** — provider-compatible HTTP surface, checkpoint
//!   dispatcher, and streaming interception
//! - **[`audit`]** — SQLite-backed decision records with JSON/CSV export
//! - **[`identity`]** — one-way credential hashing for tenant correlation
//! - **[`config`]** — TOML configuration and policy construction
//! - **[`cli`]** — command-line interface (clap)
//! - **[`error`]** — unified error types using `thiserror`
//!
//! ## Quick Start
//!
//! ```bash
//! # Write a default configuration
//! promptgate init
//!
//! # Start the proxy
//! promptgate start
//!
//! # Point an OpenAI SDK at the proxy
//! export OPENAI_BASE_URL=http://127.0.0.1:8080/v1
//! ```

pub mod audit;
pub mod cli;
pub mod config;
pub mod detect;
pub mod error;
pub mod identity;
pub mod policy;
pub mod proxy;
