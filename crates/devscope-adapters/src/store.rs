//! Persistence for per-author analysis documents.
//!
//! One JSON file per author under the output directory; re-runs overwrite
//! the whole file, so repeating an analysis costs only the model calls.

use anyhow::{Context, Result};
use devscope_core::AuthorAggregate;
use std::fs;
use std::path::{Path, PathBuf};

/// Author name reduced to a safe file stem. Rejects anything that would
/// escape the output directory. Leading and trailing dot or dash runs are
/// stripped so the stem never looks like a relative-path component.
pub fn sanitize_author(author: &str) -> Option<String> {
    let cleaned: String = author
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '-' || c == '.').to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

pub fn author_json_path(output_dir: &Path, author: &str) -> Option<PathBuf> {
    sanitize_author(author).map(|stem| output_dir.join(format!("{stem}.json")))
}

/// Write (overwrite) the author's aggregate document.
pub fn write_author_aggregate(output_dir: &Path, aggregate: &AuthorAggregate) -> Result<PathBuf> {
    let path = author_json_path(output_dir, &aggregate.author)
        .ok_or_else(|| anyhow::anyhow!("Author name '{}' is not storable", aggregate.author))?;
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output dir '{}'", output_dir.display()))?;
    let content = serde_json::to_string_pretty(aggregate)?;
    fs::write(&path, content)
        .with_context(|| format!("Failed to write analysis to '{}'", path.display()))?;
    Ok(path)
}

/// Load a previously persisted aggregate; `None` when it doesn't exist.
pub fn read_author_aggregate(output_dir: &Path, author: &str) -> Result<Option<AuthorAggregate>> {
    let Some(path) = author_json_path(output_dir, author) else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read analysis from '{}'", path.display()))?;
    let aggregate = serde_json::from_str(&content)
        .with_context(|| format!("Analysis file '{}' is corrupted", path.display()))?;
    Ok(Some(aggregate))
}
