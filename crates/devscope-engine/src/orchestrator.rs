//! Per-author fan-out: pick the heaviest merge commits and analyze them
//! concurrently under a fixed cap.

use crate::llm::client::ChatBackend;
use crate::protocol::{analyze_commit, CommitInput, PassContext};
use anyhow::{Context, Result};
use devscope_adapters::config::Config;
use devscope_adapters::repo::RepoReader;
use devscope_adapters::scorer;
use devscope_core::{AuthorAggregate, Verdict};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Knobs for one author run, lifted out of the full config so the engine
/// doesn't read global state.
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub model: String,
    pub max_rounds: usize,
    pub concurrency: usize,
    pub top_commits: usize,
    pub round_timeout: Duration,
}

impl AnalyzeOptions {
    pub fn from_config(config: &Config) -> Self {
        AnalyzeOptions {
            model: config.model.clone(),
            max_rounds: config.max_rounds,
            concurrency: config.concurrency,
            top_commits: config.top_commits,
            round_timeout: Duration::from_secs(config.round_timeout_secs),
        }
    }
}

/// Score every merge commit by the author and keep the heaviest ones,
/// descending. Unscorable commits count as 0.0 and naturally sink.
fn select_top_commits(
    reader: &RepoReader,
    hashes: &[String],
    top_commits: usize,
) -> Vec<(String, f64)> {
    let mut scored: Vec<(String, f64)> = hashes
        .iter()
        .map(|hash| (hash.clone(), scorer::score_commit(reader, hash)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(top_commits);
    scored
}

/// Analyze an author's heaviest merge commits and return the aggregate.
///
/// Each spawned task opens its own repository handle; the semaphore caps
/// how many commits talk to the model at once. A task that cannot even
/// prepare its diff degrades rather than sinking the whole run.
pub async fn analyze_author(
    repo_path: &Path,
    author: &str,
    backend: Arc<dyn ChatBackend>,
    options: &AnalyzeOptions,
) -> Result<AuthorAggregate> {
    let reader = RepoReader::open(repo_path)?;
    let commits_by_author = reader.merge_commits_by_author()?;
    let hashes = commits_by_author
        .get(author)
        .with_context(|| format!("No merge commits found for author '{author}'"))?;

    let selected = select_top_commits(&reader, hashes, options.top_commits);
    drop(reader);

    tracing::info!(
        author,
        candidates = hashes.len(),
        selected = selected.len(),
        "starting author analysis"
    );

    let semaphore = Arc::new(Semaphore::new(options.concurrency));
    let mut handles = Vec::with_capacity(selected.len());

    for (hash, score) in selected {
        let backend = Arc::clone(&backend);
        let semaphore = Arc::clone(&semaphore);
        let options = options.clone();
        let repo_path: PathBuf = repo_path.to_path_buf();

        handles.push(tokio::spawn(async move {
            // Closed semaphores don't occur here; holding the permit spans
            // both review passes so the cap covers the whole commit.
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return Verdict::degraded(&hash);
            };
            analyze_one(&repo_path, &hash, score, backend.as_ref(), &options).await
        }));
    }

    let mut verdicts = Vec::with_capacity(handles.len());
    for joined in futures::future::join_all(handles).await {
        verdicts.push(joined.context("analysis task panicked")?);
    }

    Ok(AuthorAggregate::from_verdicts(author, verdicts))
}

async fn analyze_one(
    repo_path: &Path,
    hash: &str,
    score: f64,
    backend: &dyn ChatBackend,
    options: &AnalyzeOptions,
) -> Verdict {
    let reader = match RepoReader::open(repo_path) {
        Ok(reader) => reader,
        Err(err) => {
            tracing::warn!(commit = hash, error = %err, "failed to open repository");
            return Verdict::degraded(hash);
        }
    };
    let diff = match reader.diff_text(hash) {
        Ok(diff) => diff,
        Err(err) => {
            tracing::warn!(commit = hash, error = %err, "failed to build diff");
            return Verdict::degraded(hash);
        }
    };
    let tree_paths = reader.tree_paths(hash).unwrap_or_default();
    drop(reader);

    let context = PassContext {
        backend,
        repo_path,
        model: &options.model,
        commit_hash: hash,
        tree_paths: &tree_paths,
        max_rounds: options.max_rounds,
        round_timeout: options.round_timeout,
    };
    let commit = CommitInput {
        hash: hash.to_string(),
        diff,
        score,
    };

    analyze_commit(&context, &commit).await
}
