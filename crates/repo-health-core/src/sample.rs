//! Budgeted, deterministic selection of representative chunks.
//!
//! The model's context window only fits a handful of code excerpts, so
//! the sampler picks at most `budget` chunks in three passes:
//!
//! 1. The first chunk of every entry-point file (`main`, `index`, `app`,
//!    `config`, … by file stem) and of every dependency manifest.
//! 2. The first chunk of every remaining file.
//! 3. Any later chunks.
//!
//! Passes 2 and 3 rotate across top-level directories, taking one chunk
//! from each directory before a second from any. Files are visited in
//! lexical path order, so identical input always gives identical output.

use std::collections::{BTreeMap, HashSet, VecDeque};

use thiserror::Error;

use crate::language;
use crate::manifest;
use crate::models::{Chunk, SourceFile};

/// File stems that usually mark an entry point or central module.
pub const ENTRY_POINT_NAMES: &[&str] = &[
    "main",
    "index",
    "app",
    "server",
    "client",
    "config",
    "setup",
    "init",
    "routes",
    "api",
    "controller",
    "service",
    "model",
    "handler",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SamplingError {
    #[error("no analyzable content: the filtered corpus is empty")]
    EmptyCorpus,
}

/// Chunks chosen for the prompt plus corpus-level metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSet {
    pub samples: Vec<Chunk>,
    /// Display language name → file count.
    pub languages: BTreeMap<String, usize>,
    /// Ecosystem → package names.
    pub dependencies: BTreeMap<String, Vec<String>>,
    pub total_files: usize,
}

/// Whether `path` looks like an entry point or central module.
pub fn is_entry_point(path: &str) -> bool {
    if manifest::is_manifest(path) {
        return true;
    }
    let name = path.rsplit('/').next().unwrap_or(path);
    let stem = name.trim_start_matches('.');
    let first = stem
        .split(|c| c == '-' || c == '_' || c == '.')
        .find(|s| !s.is_empty())
        .unwrap_or("");
    ENTRY_POINT_NAMES.contains(&first.to_lowercase().as_str())
}

fn top_level_dir(path: &str) -> &str {
    match path.find('/') {
        Some(i) => &path[..i],
        None => "",
    }
}

/// Select at most `budget` chunks from `chunks` and derive metadata from `files`.
///
/// Fails with [`SamplingError::EmptyCorpus`] when there is nothing to sample.
pub fn select(
    files: &[SourceFile],
    chunks: &[Chunk],
    budget: usize,
) -> Result<SampleSet, SamplingError> {
    if chunks.is_empty() {
        return Err(SamplingError::EmptyCorpus);
    }

    let mut by_file: BTreeMap<&str, Vec<&Chunk>> = BTreeMap::new();
    for c in chunks {
        by_file.entry(c.file_path.as_str()).or_default().push(c);
    }
    for list in by_file.values_mut() {
        list.sort_by_key(|c| c.chunk_index);
    }

    let mut picked: Vec<Chunk> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut take = |c: &Chunk, picked: &mut Vec<Chunk>| -> bool {
        if picked.len() >= budget {
            return false;
        }
        if seen.insert(c.id.clone()) {
            picked.push(c.clone());
        }
        picked.len() < budget
    };

    // Pass 1: entry points.
    let mut remaining_firsts: Vec<&Chunk> = Vec::new();
    for (path, list) in &by_file {
        let first = list[0];
        if is_entry_point(path) {
            take(first, &mut picked);
        } else {
            remaining_firsts.push(first);
        }
    }

    // Pass 2: first chunk of every other file.
    for c in round_robin(remaining_firsts) {
        if !take(c, &mut picked) {
            break;
        }
    }

    // Pass 3: later chunks, ordered by depth into the file so early parts win.
    let mut later: Vec<&Chunk> = by_file
        .values()
        .flat_map(|list| list.iter().skip(1).copied())
        .collect();
    later.sort_by(|a, b| {
        (a.chunk_index, a.file_path.as_str()).cmp(&(b.chunk_index, b.file_path.as_str()))
    });
    for c in round_robin(later) {
        if !take(c, &mut picked) {
            break;
        }
    }

    let languages = language::histogram(files.iter().map(|f| f.extension.as_str()));
    let dependencies =
        manifest::collect_dependencies(files.iter().map(|f| (f.path.as_str(), f.content.as_str())));

    Ok(SampleSet {
        samples: picked,
        languages,
        dependencies,
        total_files: files.len(),
    })
}

/// Interleave `items` across top-level directories (lexical directory order),
/// preserving the incoming order within each directory.
fn round_robin(items: Vec<&Chunk>) -> Vec<&Chunk> {
    let mut queues: BTreeMap<&str, VecDeque<&Chunk>> = BTreeMap::new();
    for c in items {
        queues
            .entry(top_level_dir(&c.file_path))
            .or_default()
            .push_back(c);
    }

    let mut out = Vec::new();
    while queues.values().any(|q| !q.is_empty()) {
        for q in queues.values_mut() {
            if let Some(c) = q.pop_front() {
                out.push(c);
            }
        }
    }
    out
}
