//! Request handlers for the analysis API.

use crate::error::ApiError;
use crate::AppState;
use axum::extract::{Path as UrlPath, State};
use axum::Json;
use devscope_adapters::repo::{self, CloneStatus, RepoEntry};
use devscope_adapters::store;
use devscope_core::AuthorAggregate;
use devscope_engine::orchestrator::{analyze_author, AnalyzeOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct CloneRequest {
    pub repo_url: String,
    /// Checkout directory name; derived from the URL when omitted.
    #[serde(default)]
    pub target_dir: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CloneResponse {
    pub status: &'static str,
    pub path: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct ListReposResponse {
    pub repositories: Vec<RepoEntry>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub repo_url: String,
    pub author: String,
    #[serde(default)]
    pub target_dir: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub repository: RepositoryStatus,
    pub author: String,
    pub commits_analyzed: usize,
    pub output_path: PathBuf,
    pub data: AuthorAggregate,
}

#[derive(Debug, Serialize)]
pub struct RepositoryStatus {
    pub status: &'static str,
    pub path: PathBuf,
    pub url: String,
}

/// Resolve the checkout directory for a request, refusing names that
/// could escape the base directory.
fn checkout_dir(state: &AppState, repo_url: &str, target_dir: Option<&str>) -> Result<PathBuf, ApiError> {
    let name = match target_dir {
        Some(name) => name.to_string(),
        None => repo::repo_dir_name(repo_url),
    };
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
    {
        return Err(ApiError::BadRequest(format!(
            "Invalid repository directory name '{name}'"
        )));
    }
    Ok(state.config.repositories_dir.join(name))
}

/// Clone a repository if absent. Cloning shells out to git, so it runs on
/// the blocking pool.
async fn ensure_cloned(repo_url: String, dest: PathBuf) -> Result<CloneStatus, ApiError> {
    let url = repo_url.clone();
    let status = tokio::task::spawn_blocking(move || repo::clone_repository(&url, &dest))
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("clone task failed: {e}")))?
        .map_err(|e| ApiError::BadRequest(format!("Failed to clone '{repo_url}': {e}")))?;
    Ok(status)
}

pub async fn clone_repo(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CloneRequest>,
) -> Result<Json<CloneResponse>, ApiError> {
    let dest = checkout_dir(&state, &request.repo_url, request.target_dir.as_deref())?;
    let status = ensure_cloned(request.repo_url, dest.clone()).await?;
    Ok(Json(CloneResponse {
        status: status.as_str(),
        path: dest,
    }))
}

pub async fn list_repos(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ListReposResponse>, ApiError> {
    let repositories = repo::list_repositories(&state.config.repositories_dir)
        .map_err(ApiError::Internal)?;
    Ok(Json(ListReposResponse { repositories }))
}

pub async fn analyze(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let dest = checkout_dir(&state, &request.repo_url, request.target_dir.as_deref())?;
    let status = ensure_cloned(request.repo_url.clone(), dest.clone()).await?;

    if !dest.join(".git").exists() {
        return Err(ApiError::BadRequest(format!(
            "Path is not a git repository: {}",
            dest.display()
        )));
    }

    let options = AnalyzeOptions::from_config(&state.config);
    let aggregate = analyze_author(&dest, &request.author, Arc::clone(&state.backend), &options)
        .await
        .map_err(|e| {
            if e.to_string().contains("No merge commits") {
                ApiError::NotFound(format!(
                    "Author '{}' not found in repository",
                    request.author
                ))
            } else {
                ApiError::Internal(e)
            }
        })?;

    let output_path = store::write_author_aggregate(&state.config.output_dir, &aggregate)
        .map_err(ApiError::Internal)?;

    Ok(Json(AnalyzeResponse {
        repository: RepositoryStatus {
            status: status.as_str(),
            path: dest,
            url: request.repo_url,
        },
        author: aggregate.author.clone(),
        commits_analyzed: aggregate.commits.len(),
        output_path,
        data: aggregate,
    }))
}

pub async fn get_analysis(
    State(state): State<Arc<AppState>>,
    UrlPath(author): UrlPath<String>,
) -> Result<Json<AuthorAggregate>, ApiError> {
    let aggregate = store::read_author_aggregate(&state.config.output_dir, &author)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound(format!("No analysis found for author '{author}'")))?;
    Ok(Json(aggregate))
}
