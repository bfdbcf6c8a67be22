//! # Repo Health
//!
//! Repository health reports via retrieval-augmented generation.
//!
//! A submitted repository URL becomes a job. One job at a time is cloned,
//! split into overlapping chunks, embedded into a per-job vector
//! collection, sampled down to a fixed budget, and handed to an LLM that
//! returns a JSON health report. Job status and reports live in SQLite.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌─────────┐   ┌──────────┐   ┌───────────┐
//! │  Ingest  │──▶│  Chunk   │──▶│  Index  │──▶│  Sample  │──▶│ Generator │
//! │ git+walk │   │ overlap  │   │ embed   │   │ budgeted │   │ LLM+retry │
//! └──────────┘   └──────────┘   └─────────┘   └──────────┘   └─────┬─────┘
//!                                                                  │
//!        ┌─────────────────────────────────────────────────────────┘
//!        ▼
//!   ┌──────────┐        ┌──────────┐   ┌──────────┐
//!   │   Job    │◀───────│   CLI    │   │   HTTP   │
//!   │ Registry │◀───────│  (rh)    │   │  (axum)  │
//!   └──────────┘        └──────────┘   └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`errors`] | Typed error per pipeline stage |
//! | [`ingest`] | URL normalization, cloning, file discovery |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Per-job embedding collections |
//! | [`sqlite_store`] | SQLite vector-store backend |
//! | [`llm`] | LLM providers and credential pool |
//! | [`generator`] | Prompting, rotation/backoff, report parsing |
//! | [`jobs`] | Job registry state machine and stores |
//! | [`orchestrator`] | Pipeline and single-slot job dispatch |
//! | [`progress`] | Progress events and CLI reporters |
//! | [`server`] | HTTP job API |
//! | [`commands`] | CLI command implementations |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`logging`] | Tracing subscriber setup |

pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod errors;
pub mod generator;
pub mod index;
pub mod ingest;
pub mod jobs;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod orchestrator;
pub mod progress;
pub mod server;
pub mod sqlite_store;

pub use repo_health_core as core;
