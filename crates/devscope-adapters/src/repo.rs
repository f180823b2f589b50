//! Repository reader: merge-commit discovery, diffs, and tree access.
//!
//! Network operations (cloning) go through the `git` CLI with a hard
//! timeout; everything else reads the object database through git2.

use crate::util::run_command_with_timeout;
use anyhow::{Context, Result};
use git2::{BranchType, Commit, DiffFormat, ObjectType, Repository, TreeWalkMode, TreeWalkResult};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

const CLONE_TIMEOUT: Duration = Duration::from_secs(300);

/// A file's path and content at a given commit.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub path: String,
    pub content: String,
}

/// Outcome of a clone request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneStatus {
    Cloned,
    Exists,
}

impl CloneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloneStatus::Cloned => "cloned",
            CloneStatus::Exists => "exists",
        }
    }
}

/// A cloned repository directory, as listed under the repositories base dir.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RepoEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_git_repo: bool,
}

fn github_noreply_with_id() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d+\+([^@]+)@users\.noreply\.github\.com$").expect("valid regex")
    })
}

fn github_noreply_plain() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^@]+)@users\.noreply\.github\.com$").expect("valid regex"))
}

/// Recover a stable author identity from a commit e-mail.
///
/// GitHub no-reply addresses (both the `12345+user@` and the older plain
/// form) map to the embedded username; anything else falls back to the
/// local part of the address.
pub fn extract_username(email: &str) -> String {
    let email = email.to_lowercase();

    if let Some(caps) = github_noreply_with_id().captures(&email) {
        return caps[1].to_string();
    }
    if let Some(caps) = github_noreply_plain().captures(&email) {
        return caps[1].to_string();
    }
    email.split('@').next().unwrap_or(&email).to_string()
}

/// Read-only handle on one repository.
///
/// Each concurrent analysis task opens its own reader; the handle is not
/// shared across tasks.
pub struct RepoReader {
    repo: Repository,
}

impl RepoReader {
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path).with_context(|| {
            format!("Failed to open repository from path '{}'", path.display())
        })?;
        Ok(Self { repo })
    }

    fn commit(&self, hash: &str) -> Result<Commit<'_>> {
        let oid = git2::Oid::from_str(hash).with_context(|| format!("Bad commit id '{hash}'"))?;
        self.repo
            .find_commit(oid)
            .with_context(|| format!("Commit '{hash}' not found"))
    }

    /// Map author username -> merge-commit hashes, across all local
    /// branches, in branch walk order with duplicates removed.
    pub fn merge_commits_by_author(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut seen: HashSet<git2::Oid> = HashSet::new();

        for branch in self.repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            let Some(target) = branch.get().target() else {
                continue;
            };

            let mut revwalk = self.repo.revwalk()?;
            revwalk.push(target)?;
            for oid in revwalk {
                let oid = oid?;
                if !seen.insert(oid) {
                    continue;
                }
                let commit = self.repo.find_commit(oid)?;
                if commit.parent_count() != 2 {
                    continue;
                }
                let email = commit.author().email().unwrap_or("").to_string();
                if email.is_empty() {
                    continue;
                }
                let username = extract_username(&email);
                map.entry(username).or_default().push(oid.to_string());
            }
        }

        Ok(map)
    }

    /// Commit message plus a per-file unified diff against the first parent.
    pub fn diff_text(&self, hash: &str) -> Result<String> {
        let commit = self.commit(hash)?;
        if commit.parent_count() != 2 {
            anyhow::bail!("Commit '{hash}' is not a merge commit (expected 2 parents)");
        }

        let parent_tree = commit.parent(0)?.tree()?;
        let commit_tree = commit.tree()?;
        let diff = self
            .repo
            .diff_tree_to_tree(Some(&parent_tree), Some(&commit_tree), None)?;

        let mut out = String::new();
        out.push_str(commit.message().unwrap_or_default());
        out.push_str("\n\n");

        let mut current_file: Option<String> = None;
        diff.print(DiffFormat::Patch, |delta, _hunk, line| {
            let path = delta
                .new_file()
                .path()
                .or_else(|| delta.old_file().path())
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            if current_file.as_deref() != Some(path.as_str()) {
                out.push_str(&format!("==== File: {} ====\n", path));
                current_file = Some(path);
            }
            match line.origin() {
                '+' | '-' | ' ' => out.push(line.origin()),
                _ => {}
            }
            out.push_str(&String::from_utf8_lossy(line.content()));
            true
        })?;

        Ok(out)
    }

    /// Every blob path present in the commit's tree.
    pub fn tree_paths(&self, hash: &str) -> Result<Vec<String>> {
        let commit = self.commit(hash)?;
        let tree = commit.tree()?;
        let mut paths = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    paths.push(format!("{root}{name}"));
                }
            }
            TreeWalkResult::Ok
        })?;
        Ok(paths)
    }

    /// Contents of the requested paths at the commit, as fenced per-file
    /// blocks. Paths not present in the tree are skipped, not errors.
    pub fn file_contents(&self, hash: &str, paths: &[String]) -> Result<String> {
        let commit = self.commit(hash)?;
        let tree = commit.tree()?;

        let mut chunks = Vec::new();
        for path in paths {
            let Ok(entry) = tree.get_path(Path::new(path)) else {
                tracing::debug!(path, "requested path not in commit tree; skipping");
                continue;
            };
            let object = entry.to_object(&self.repo)?;
            let Some(blob) = object.as_blob() else {
                continue;
            };
            let content = String::from_utf8_lossy(blob.content());
            chunks.push(format!("### FILE: `{path}`\n\n```\n{content}\n```\n"));
        }

        Ok(chunks.join("\n\n"))
    }

    /// Post-commit snapshots of the files changed by a merge commit
    /// (relative to its first parent). Deleted files use the pre-image so
    /// their weight still counts.
    pub fn changed_files(&self, hash: &str) -> Result<Vec<FileSnapshot>> {
        let commit = self.commit(hash)?;
        let parent_tree = commit.parent(0)?.tree()?;
        let commit_tree = commit.tree()?;
        let diff = self
            .repo
            .diff_tree_to_tree(Some(&parent_tree), Some(&commit_tree), None)?;

        let mut files = Vec::new();
        for delta in diff.deltas() {
            let (file, path) = if delta.new_file().id() != git2::Oid::zero() {
                (delta.new_file(), delta.new_file().path())
            } else {
                (delta.old_file(), delta.old_file().path())
            };
            let Some(path) = path else { continue };
            let Ok(blob) = self.repo.find_blob(file.id()) else {
                continue;
            };
            files.push(FileSnapshot {
                path: path.display().to_string(),
                content: String::from_utf8_lossy(blob.content()).into_owned(),
            });
        }
        Ok(files)
    }

    /// Snapshots of every blob in the commit's tree (whole-tree scoring).
    pub fn tree_files(&self, hash: &str) -> Result<Vec<FileSnapshot>> {
        let paths = self.tree_paths(hash)?;
        let commit = self.commit(hash)?;
        let tree = commit.tree()?;
        let mut files = Vec::new();
        for path in paths {
            let Ok(entry) = tree.get_path(Path::new(&path)) else {
                continue;
            };
            let object = entry.to_object(&self.repo)?;
            if let Some(blob) = object.as_blob() {
                files.push(FileSnapshot {
                    path,
                    content: String::from_utf8_lossy(blob.content()).into_owned(),
                });
            }
        }
        Ok(files)
    }
}

/// Clone a repository to `dest` unless it already exists, then create local
/// tracking branches for every remote branch so the branch walk sees them.
pub fn clone_repository(repo_url: &str, dest: &Path) -> Result<CloneStatus> {
    if dest.exists() {
        return Ok(CloneStatus::Exists);
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut cmd = Command::new("git");
    cmd.arg("clone").arg(repo_url).arg(dest);
    let result = run_command_with_timeout(&mut cmd, CLONE_TIMEOUT)?;
    if result.timed_out {
        anyhow::bail!("Clone of '{repo_url}' timed out");
    }
    if !result.success() {
        anyhow::bail!(
            "Failed to clone '{repo_url}': {}",
            result.stderr.trim().lines().last().unwrap_or("unknown error")
        );
    }

    create_local_tracking_branches(dest)?;
    tracing::info!(url = repo_url, path = %dest.display(), "repository cloned");
    Ok(CloneStatus::Cloned)
}

fn create_local_tracking_branches(path: &Path) -> Result<()> {
    let repo = Repository::open(path)?;
    let remote_branches: Vec<(String, git2::Oid)> = repo
        .branches(Some(BranchType::Remote))?
        .filter_map(|b| b.ok())
        .filter_map(|(branch, _)| {
            let name = branch.get().shorthand()?.to_string();
            let target = branch.get().target()?;
            Some((name, target))
        })
        .collect();

    for (remote_name, target) in remote_branches {
        // "origin/feature" -> "feature"; skip the symbolic HEAD entry.
        let Some(local_name) = remote_name.split_once('/').map(|(_, rest)| rest) else {
            continue;
        };
        if local_name == "HEAD" {
            continue;
        }
        if repo.find_branch(local_name, BranchType::Local).is_ok() {
            continue;
        }
        let commit = repo.find_commit(target)?;
        let mut branch = repo.branch(local_name, &commit, false)?;
        let _ = branch.set_upstream(Some(&remote_name));
    }
    Ok(())
}

/// Derive a checkout directory name from a clone URL.
pub fn repo_dir_name(repo_url: &str) -> String {
    let name = repo_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(repo_url);
    name.trim_end_matches(".git").to_string()
}

/// List cloned repository directories under the base dir.
pub fn list_repositories(base_dir: &Path) -> Result<Vec<RepoEntry>> {
    let mut repos = Vec::new();
    if !base_dir.exists() {
        return Ok(repos);
    }
    for entry in std::fs::read_dir(base_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        repos.push(RepoEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_git_repo: path.join(".git").exists(),
            path,
        });
    }
    repos.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(repos)
}

#[cfg(test)]
pub mod testutil {
    //! Scratch-repository builder shared by adapter and engine tests.

    use git2::{Repository, Signature};
    use std::path::Path;

    pub fn init_repo(path: &Path) -> Repository {
        let repo = Repository::init(path).unwrap();
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "Test").unwrap();
            config.set_str("user.email", "test@example.com").unwrap();
        }
        repo
    }

    pub fn signature(email: &str) -> Signature<'static> {
        Signature::now("Test Author", email).unwrap()
    }

    pub fn commit_files(
        repo: &Repository,
        files: &[(&str, &str)],
        message: &str,
        email: &str,
        parents: &[&git2::Commit<'_>],
    ) -> git2::Oid {
        let workdir = repo.workdir().unwrap();
        for (path, content) in files {
            let full = workdir.join(path);
            if let Some(dir) = full.parent() {
                std::fs::create_dir_all(dir).unwrap();
            }
            std::fs::write(full, content).unwrap();
        }
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = signature(email);
        // No update-ref: a detached HEAD at the feature tip is not the
        // first parent of the merge, and git2 rejects advancing it.
        let oid = repo
            .commit(None, &sig, &sig, message, &tree, parents)
            .unwrap();
        repo.set_head_detached(oid).unwrap();
        oid
    }

    /// Build main + feature branches and a two-parent merge commit by
    /// `email`. Returns the merge commit hash.
    pub fn build_repo_with_merge(path: &Path, email: &str) -> String {
        let repo = init_repo(path);

        let base = commit_files(
            &repo,
            &[("app.py", "def run():\n    return 1\n")],
            "initial",
            "base@example.com",
            &[],
        );
        let base_commit = repo.find_commit(base).unwrap();
        repo.branch("main", &base_commit, true).unwrap();

        let feature = commit_files(
            &repo,
            &[("feature.py", "def helper(x):\n    return x * 2\n")],
            "add helper",
            email,
            &[&base_commit],
        );
        let feature_commit = repo.find_commit(feature).unwrap();

        // Merge feature into main: tree contains both files.
        let merge = commit_files(
            &repo,
            &[],
            "Merge branch 'feature'",
            email,
            &[&base_commit, &feature_commit],
        );
        let merge_commit = repo.find_commit(merge).unwrap();
        repo.branch("main", &merge_commit, true).unwrap();
        repo.set_head("refs/heads/main").unwrap();

        merge.to_string()
    }
}
