//! HTML report rendering for a persisted author analysis.
//!
//! Charts are plain inline SVG built here rather than a plotting library:
//! a scatter of issues against effort and a pie of merge categories, both
//! using a fixed per-category palette.

use anyhow::{Context, Result};
use askama::Template;
use chrono::Utc;
use devscope_adapters::store;
use devscope_core::{AuthorAggregate, Effort, MergeCategory, Severity, Verdict};
use std::path::{Path, PathBuf};

/// Stable chart colour for each merge category.
pub fn category_color(category: MergeCategory) -> &'static str {
    match category {
        MergeCategory::Feature => "#1f77b4",
        MergeCategory::BugFix => "#d62728",
        MergeCategory::Refactor => "#2ca02c",
        MergeCategory::Performance => "#ff7f0e",
        MergeCategory::SecurityPatch => "#9467bd",
        MergeCategory::Docs => "#8c564b",
        MergeCategory::Chore => "#e377c2",
    }
}

#[derive(Template)]
#[template(path = "report.html")]
struct ReportTemplate {
    author: String,
    generated_at: String,
    total_commits: usize,
    total_issues: usize,
    avg_issues: String,
    most_common_effort: String,
    scatter_svg: String,
    pie_svg: String,
    issues: Vec<IssueRow>,
}

struct IssueRow {
    level: &'static str,
    file_path: String,
    line: String,
    issue: String,
    proposed_solution: String,
    /// Empty when no repository URL was supplied.
    commit_url: String,
}

fn severity_rank(level: Severity) -> usize {
    // CRITICAL first in the table.
    match level {
        Severity::Critical => 0,
        Severity::High => 1,
        Severity::Medium => 2,
        Severity::Low => 3,
    }
}

fn issue_rows(analyses: &[Verdict], repo_url: Option<&str>) -> Vec<IssueRow> {
    let repo_url = repo_url.map(|u| u.trim_end_matches('/').to_string());
    let mut rows: Vec<(Severity, IssueRow)> = Vec::new();
    for verdict in analyses {
        for issue in &verdict.issues {
            let commit_url = repo_url
                .as_ref()
                .map(|base| format!("{}/commit/{}", base, verdict.commit_hash))
                .unwrap_or_default();
            rows.push((
                issue.level,
                IssueRow {
                    level: issue.level.as_str(),
                    file_path: issue.file_path.clone(),
                    line: issue.line.clone(),
                    issue: issue.issue.clone(),
                    proposed_solution: issue.proposed_solution.clone().unwrap_or_default(),
                    commit_url,
                },
            ));
        }
    }
    rows.sort_by_key(|(level, _)| severity_rank(*level));
    rows.into_iter().map(|(_, row)| row).collect()
}

fn most_common_effort(analyses: &[Verdict]) -> String {
    let mut counts = [0usize; 5];
    for verdict in analyses {
        counts[(verdict.effort_estimate.score() - 1) as usize] += 1;
    }
    // Ties go to the lower effort.
    let mut best: Option<(Effort, usize)> = None;
    for (effort, count) in Effort::ALL.iter().zip(counts) {
        if count > 0 && best.map_or(true, |(_, c)| count > c) {
            best = Some((*effort, count));
        }
    }
    best.map(|(effort, _)| effort.as_str().to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn polar(cx: f64, cy: f64, r: f64, angle_deg: f64) -> (f64, f64) {
    let rad = angle_deg.to_radians();
    (cx + r * rad.cos(), cy + r * rad.sin())
}

/// Scatter of issue counts against effort, one dot per analyzed commit.
fn scatter_svg(analyses: &[Verdict]) -> String {
    const WIDTH: f64 = 640.0;
    const HEIGHT: f64 = 400.0;
    const LEFT: f64 = 55.0;
    const RIGHT: f64 = 470.0;
    const TOP: f64 = 20.0;
    const BOTTOM: f64 = 340.0;

    let max_issues = analyses
        .iter()
        .map(|v| v.issues.len())
        .max()
        .unwrap_or(0)
        .max(1);

    let x_for = |effort: Effort| {
        let slot = (effort.score() - 1) as f64;
        LEFT + (RIGHT - LEFT) * (slot + 0.5) / 5.0
    };
    let y_for = |issues: usize| BOTTOM - (BOTTOM - TOP) * issues as f64 / max_issues as f64;

    let mut svg = format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {WIDTH} {HEIGHT}" role="img" aria-label="Issues vs. effort">"##
    );

    // Axes.
    svg.push_str(&format!(
        r##"<line x1="{LEFT}" y1="{BOTTOM}" x2="{RIGHT}" y2="{BOTTOM}" stroke="#888"/><line x1="{LEFT}" y1="{TOP}" x2="{LEFT}" y2="{BOTTOM}" stroke="#888"/>"##
    ));
    for effort in Effort::ALL {
        let x = x_for(effort);
        svg.push_str(&format!(
            r##"<text x="{x:.1}" y="{y}" font-size="12" text-anchor="middle" fill="#333">{}</text>"##,
            effort.as_str(),
            y = BOTTOM + 20.0,
        ));
    }
    for tick in 0..=max_issues {
        let y = y_for(tick);
        svg.push_str(&format!(
            r##"<text x="{x}" y="{y:.1}" font-size="11" text-anchor="end" fill="#333">{tick}</text>"##,
            x = LEFT - 8.0,
        ));
    }
    svg.push_str(&format!(
        r##"<text x="{x:.1}" y="{y}" font-size="13" text-anchor="middle" fill="#111">Effort estimate</text>"##,
        x = (LEFT + RIGHT) / 2.0,
        y = HEIGHT - 14.0,
    ));

    // Points, with a small horizontal offset so stacked dots stay visible.
    for (idx, verdict) in analyses.iter().enumerate() {
        let x = x_for(verdict.effort_estimate) + (idx % 3) as f64 * 5.0 - 5.0;
        let y = y_for(verdict.issues.len());
        svg.push_str(&format!(
            r##"<circle cx="{x:.1}" cy="{y:.1}" r="7" fill="{}" stroke="#000" stroke-width="0.7"><title>{} ({} issues)</title></circle>"##,
            category_color(verdict.category),
            verdict.commit_hash,
            verdict.issues.len(),
        ));
    }

    // Legend: only categories that occur.
    let mut seen: Vec<MergeCategory> = Vec::new();
    for verdict in analyses {
        if !seen.contains(&verdict.category) {
            seen.push(verdict.category);
        }
    }
    for (idx, category) in seen.iter().enumerate() {
        let y = TOP + 14.0 + idx as f64 * 20.0;
        svg.push_str(&format!(
            r##"<circle cx="{x}" cy="{y:.1}" r="6" fill="{}"/><text x="{tx}" y="{ty:.1}" font-size="12" fill="#333">{}</text>"##,
            category_color(*category),
            category.as_str(),
            x = RIGHT + 20.0,
            tx = RIGHT + 32.0,
            ty = y + 4.0,
        ));
    }

    svg.push_str("</svg>");
    svg
}

/// Pie of merge categories across the analyzed commits.
fn pie_svg(analyses: &[Verdict]) -> String {
    const WIDTH: f64 = 520.0;
    const HEIGHT: f64 = 360.0;
    const CX: f64 = 170.0;
    const CY: f64 = 180.0;
    const R: f64 = 140.0;

    let mut counts: Vec<(MergeCategory, usize)> = Vec::new();
    for verdict in analyses {
        match counts.iter_mut().find(|(c, _)| *c == verdict.category) {
            Some((_, count)) => *count += 1,
            None => counts.push((verdict.category, 1)),
        }
    }
    let total: usize = counts.iter().map(|(_, c)| c).sum();

    let mut svg = format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {WIDTH} {HEIGHT}" role="img" aria-label="Commits by type">"##
    );

    if total == 0 {
        svg.push_str(&format!(
            r##"<text x="{CX}" y="{CY}" font-size="14" text-anchor="middle" fill="#555">No data</text>"##
        ));
    } else if counts.len() == 1 {
        // A single slice is the whole circle; an arc of 360 degrees would
        // collapse to a point.
        svg.push_str(&format!(
            r##"<circle cx="{CX}" cy="{CY}" r="{R}" fill="{}" stroke="#fff" stroke-width="0.5"/>"##,
            category_color(counts[0].0)
        ));
    } else {
        // Clockwise from twelve o'clock.
        let mut start_deg = -90.0;
        for (category, count) in &counts {
            let sweep = 360.0 * *count as f64 / total as f64;
            let end_deg = start_deg + sweep;
            let (x1, y1) = polar(CX, CY, R, start_deg);
            let (x2, y2) = polar(CX, CY, R, end_deg);
            let large_arc = if sweep > 180.0 { 1 } else { 0 };
            svg.push_str(&format!(
                r##"<path d="M {CX} {CY} L {x1:.2} {y1:.2} A {R} {R} 0 {large_arc} 1 {x2:.2} {y2:.2} Z" fill="{}" stroke="#fff" stroke-width="0.5"/>"##,
                category_color(*category)
            ));
            let (lx, ly) = polar(CX, CY, R * 0.65, (start_deg + end_deg) / 2.0);
            svg.push_str(&format!(
                r##"<text x="{lx:.1}" y="{ly:.1}" font-size="12" text-anchor="middle" fill="#fff">{:.0}%</text>"##,
                100.0 * *count as f64 / total as f64
            ));
            start_deg = end_deg;
        }
    }

    for (idx, (category, count)) in counts.iter().enumerate() {
        let y = 40.0 + idx as f64 * 22.0;
        svg.push_str(&format!(
            r##"<rect x="{x}" y="{ry:.1}" width="12" height="12" fill="{}"/><text x="{tx}" y="{ty:.1}" font-size="12" fill="#333">{} ({count})</text>"##,
            category_color(*category),
            category.as_str(),
            x = 340.0,
            ry = y - 10.0,
            tx = 358.0,
            ty = y,
        ));
    }

    svg.push_str("</svg>");
    svg
}

/// Render the report HTML for one author.
pub fn render_report(aggregate: &AuthorAggregate, repo_url: Option<&str>) -> Result<String> {
    let analyses = &aggregate.analyses;
    let total_issues: usize = analyses.iter().map(|v| v.issues.len()).sum();
    let avg_issues = if analyses.is_empty() {
        "0.0".to_string()
    } else {
        format!("{:.1}", total_issues as f64 / analyses.len() as f64)
    };

    let template = ReportTemplate {
        author: aggregate.author.clone(),
        generated_at: Utc::now().format("%Y-%m-%d %H:%M UTC").to_string(),
        total_commits: analyses.len(),
        total_issues,
        avg_issues,
        most_common_effort: most_common_effort(analyses),
        scatter_svg: scatter_svg(analyses),
        pie_svg: pie_svg(analyses),
        issues: issue_rows(analyses, repo_url),
    };

    template.render().context("Failed to render report template")
}

/// Render and write `{output_dir}/{author}.html`. Returns the output path.
pub fn write_report(
    output_dir: &Path,
    aggregate: &AuthorAggregate,
    repo_url: Option<&str>,
) -> Result<PathBuf> {
    let stem = store::sanitize_author(&aggregate.author)
        .ok_or_else(|| anyhow::anyhow!("Author name '{}' is not storable", aggregate.author))?;
    let html = render_report(aggregate, repo_url)?;
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output dir '{}'", output_dir.display()))?;
    let path = output_dir.join(format!("{stem}.html"));
    std::fs::write(&path, html)
        .with_context(|| format!("Failed to write report to '{}'", path.display()))?;
    tracing::info!(path = %path.display(), "report written");
    Ok(path)
}
