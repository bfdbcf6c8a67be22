//! # Repo Health Core
//!
//! I/O-free logic for repository health analysis: data models, the
//! overlapping chunker, the budgeted sampler, dependency-manifest
//! parsing, the report schema and parser, the vector-store trait with an
//! in-memory implementation, and the embedder trait.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or network code.

pub mod chunk;
pub mod embedding;
pub mod language;
pub mod manifest;
pub mod models;
pub mod report;
pub mod sample;
pub mod store;
