//! Repository ingestion: URL normalisation, cloning, and the filtered
//! file walk.
//!
//! Workflow for one job:
//! 1. Normalise the submitted URL ([`normalize_repo_url`]).
//! 2. Clone into `<workspace.dir>/<job_id>/` through a [`CloneProvider`].
//!    A leftover directory for the same job id is removed first; the
//!    fresh clone is kept after the job ends.
//! 3. Walk the tree, skipping `[ingest] skip_dirs` and `exclude_globs`,
//!    keeping allowlisted extensions plus dependency manifests.
//! 4. Read each candidate. Oversized, unreadable, and binary files are
//!    skipped and counted; none of them fail the job.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use url::Url;
use walkdir::WalkDir;

use repo_health_core::language::{extension_of, language_tag};
use repo_health_core::manifest::is_manifest;
use repo_health_core::models::{JobId, SourceFile};

use crate::config::IngestConfig;
use crate::errors::IngestError;
use crate::progress::{should_report, ProgressEvent, ProgressSink};

/// Normalise a user-supplied repository URL.
///
/// - `github.com/owner/repo` gains `https://`
/// - `git@host:owner/repo(.git)` is accepted unchanged
/// - `http`, `https`, `ssh` and `git` URLs are accepted
/// - `file://` URLs and local paths are rejected
///
/// The result must name a host and at least `owner/repo`.
pub fn normalize_repo_url(raw: &str) -> Result<String, IngestError> {
    let raw = raw.trim();
    let invalid = |reason: &str| IngestError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    if raw.is_empty() {
        return Err(invalid("URL is empty"));
    }
    if raw.chars().any(char::is_whitespace) {
        return Err(invalid("URL contains whitespace"));
    }

    if let Some(rest) = raw.strip_prefix("git@") {
        let (host, path) = rest
            .split_once(':')
            .ok_or_else(|| invalid("SSH form must be git@host:owner/repo"))?;
        if host.is_empty() || !has_owner_and_repo(path) {
            return Err(invalid("SSH form must be git@host:owner/repo"));
        }
        return Ok(raw.to_string());
    }

    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        if raw.starts_with('/') || raw.starts_with('.') || raw.starts_with('~') || raw.contains('\\')
        {
            return Err(invalid("local paths are not supported"));
        }
        format!("https://{}", raw)
    };

    let url = Url::parse(&candidate).map_err(|e| invalid(&e.to_string()))?;
    match url.scheme() {
        "http" | "https" | "ssh" | "git" => {}
        "file" => return Err(invalid("local repositories are not supported")),
        other => return Err(invalid(&format!("unsupported scheme '{}'", other))),
    }
    let host = url.host_str().unwrap_or_default();
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    if !host.contains('.') && host != "localhost" {
        return Err(invalid("host must be a domain name"));
    }
    if !has_owner_and_repo(url.path()) {
        return Err(invalid("expected a path of the form owner/repo"));
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}

fn has_owner_and_repo(path: &str) -> bool {
    path.split('/').filter(|s| !s.is_empty()).count() >= 2
}

/// Clones a repository into a destination directory.
#[async_trait]
pub trait CloneProvider: Send + Sync {
    /// Clone `url` (optionally only `branch`) into `dest`, which does not exist yet.
    async fn clone_repo(
        &self,
        url: &str,
        branch: Option<&str>,
        dest: &Path,
    ) -> Result<(), IngestError>;
}

/// Clones with the `git` command-line tool.
///
/// Prompts are disabled (`GIT_TERMINAL_PROMPT=0`) so a private repository
/// fails fast instead of waiting for credentials.
pub struct GitCli {
    pub timeout: Duration,
    pub shallow: bool,
}

impl GitCli {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.clone_timeout_secs),
            shallow: config.shallow,
        }
    }
}

#[async_trait]
impl CloneProvider for GitCli {
    async fn clone_repo(
        &self,
        url: &str,
        branch: Option<&str>,
        dest: &Path,
    ) -> Result<(), IngestError> {
        let mut cmd = tokio::process::Command::new("git");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.args(["clone", "--single-branch"]);
        if self.shallow {
            cmd.args(["--depth", "1"]);
        }
        if let Some(branch) = branch {
            cmd.args(["--branch", branch]);
        }
        cmd.arg(url).arg(dest);
        cmd.kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                return Err(IngestError::Timeout {
                    url: url.to_string(),
                    secs: self.timeout.as_secs(),
                })
            }
            Ok(Err(e)) => {
                return Err(IngestError::Git(format!(
                    "failed to execute 'git clone': {}. Is git installed?",
                    e
                )))
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_clone_failure(url, branch, stderr.trim()));
        }
        Ok(())
    }
}

/// Map `git clone` stderr onto an [`IngestError`] variant.
pub fn classify_clone_failure(url: &str, branch: Option<&str>, stderr: &str) -> IngestError {
    let lower = stderr.to_lowercase();
    if lower.contains("remote branch") && lower.contains("not found") {
        return IngestError::MissingBranch {
            url: url.to_string(),
            branch: branch.unwrap_or_default().to_string(),
        };
    }
    if lower.contains("authentication failed")
        || lower.contains("could not read username")
        || lower.contains("repository not found")
        || lower.contains("permission denied")
    {
        return IngestError::Auth {
            url: url.to_string(),
        };
    }
    if lower.contains("could not resolve host")
        || lower.contains("unable to access")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
    {
        return IngestError::Network {
            url: url.to_string(),
            message: stderr.to_string(),
        };
    }
    IngestError::Git(stderr.to_string())
}

/// Files skipped during the walk, by reason.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SkipCounts {
    pub oversized: usize,
    pub binary: usize,
    pub unreadable: usize,
}

impl SkipCounts {
    pub fn total(&self) -> usize {
        self.oversized + self.binary + self.unreadable
    }
}

/// The result of ingesting one repository.
#[derive(Debug)]
pub struct Ingested {
    /// The job's clone directory (retained).
    pub workspace: PathBuf,
    /// Text files sorted by relative path.
    pub files: Vec<SourceFile>,
    pub skipped: SkipCounts,
}

/// Clones and reads repositories into per-job workspaces.
#[derive(Clone)]
pub struct Ingestor {
    cloner: Arc<dyn CloneProvider>,
    config: IngestConfig,
    exclude: GlobSet,
    workspace_root: PathBuf,
    progress_every: usize,
}

impl Ingestor {
    pub fn new(
        cloner: Arc<dyn CloneProvider>,
        config: IngestConfig,
        workspace_root: impl Into<PathBuf>,
        progress_every: usize,
    ) -> anyhow::Result<Self> {
        let exclude = build_globset(&config.exclude_globs)?;
        Ok(Self {
            cloner,
            config,
            exclude,
            workspace_root: workspace_root.into(),
            progress_every,
        })
    }

    /// `<workspace.dir>/<job_id>`; distinct for every job.
    pub fn workspace_for(&self, job_id: JobId) -> PathBuf {
        self.workspace_root.join(job_id.to_string())
    }

    pub async fn ingest(
        &self,
        job_id: JobId,
        url: &str,
        branch: Option<&str>,
        progress: &dyn ProgressSink,
    ) -> Result<Ingested, IngestError> {
        let dest = self.workspace_for(job_id);
        prepare_workspace(&dest).await?;

        progress.report(ProgressEvent::Cloning).await;
        tracing::info!(%job_id, url, branch = branch.unwrap_or("<default>"), dest = %dest.display(), "cloning");
        self.cloner.clone_repo(url, branch, &dest).await?;

        let (candidates, mut skipped) = discover(&dest, &self.config, &self.exclude);
        progress
            .report(ProgressEvent::Parsing {
                found: candidates.len(),
            })
            .await;

        let total = candidates.len();
        let mut files = Vec::with_capacity(total);
        for (n, (abs, rel)) in candidates.into_iter().enumerate() {
            match read_text_file(&abs).await {
                Ok(Some(content)) => {
                    let extension = extension_of(&rel);
                    let language = language_tag(&extension).to_string();
                    files.push(SourceFile {
                        path: rel,
                        content,
                        extension,
                        language,
                    });
                }
                Ok(None) => {
                    tracing::debug!(path = %rel, "skipping binary file");
                    skipped.binary += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %rel, error = %e, "skipping unreadable file");
                    skipped.unreadable += 1;
                }
            }
            if should_report(n + 1, total, self.progress_every) {
                progress
                    .report(ProgressEvent::Reading { read: n + 1, total })
                    .await;
            }
        }

        tracing::info!(
            %job_id,
            files = files.len(),
            skipped = skipped.total(),
            "ingestion complete"
        );
        Ok(Ingested {
            workspace: dest,
            files,
            skipped,
        })
    }
}

async fn prepare_workspace(dest: &Path) -> Result<(), IngestError> {
    let io = |path: &Path| {
        let path = path.to_path_buf();
        move |source| IngestError::Io { path, source }
    };
    if tokio::fs::try_exists(dest).await.map_err(io(dest))? {
        tokio::fs::remove_dir_all(dest).await.map_err(io(dest))?;
    }
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io(parent))?;
    }
    Ok(())
}

/// Read a file as UTF-8 text. `Ok(None)` for binary content (NUL bytes or invalid UTF-8).
async fn read_text_file(path: &Path) -> std::io::Result<Option<String>> {
    let bytes = tokio::fs::read(path).await?;
    if bytes.contains(&0) {
        return Ok(None);
    }
    Ok(String::from_utf8(bytes).ok())
}

/// Walk `root` and return `(absolute, relative)` paths of files to read,
/// sorted by relative path, plus the files skipped for size or I/O errors.
pub fn discover(
    root: &Path,
    config: &IngestConfig,
    exclude_set: &GlobSet,
) -> (Vec<(PathBuf, String)>, SkipCounts) {
    let mut skipped = SkipCounts::default();
    let mut out = Vec::new();

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(e.depth() > 0
                && e.file_type().is_dir()
                && config
                    .skip_dirs
                    .iter()
                    .any(|d| e.file_name().to_str() == Some(d.as_str())))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                skipped.unreadable += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        let ext = extension_of(&rel_str);
        if !config.allowed_extensions.contains(&ext) && !is_manifest(&rel_str) {
            continue;
        }

        match entry.metadata() {
            Ok(meta) if meta.len() > config.max_file_bytes => {
                tracing::debug!(path = %rel_str, bytes = meta.len(), "skipping oversized file");
                skipped.oversized += 1;
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(path = %rel_str, error = %e, "skipping unreadable file");
                skipped.unreadable += 1;
                continue;
            }
        }

        out.push((path.to_path_buf(), rel_str));
    }

    out.sort_by(|a, b| a.1.cmp(&b.1));
    (out, skipped)
}

pub fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
