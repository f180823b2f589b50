//! Verdict types for merge-commit analysis.
//!
//! These mirror the wire format produced by the model under structured
//! output, so the model's JSON is deserialized straight into them and
//! anything that doesn't conform is rejected as a whole.

use serde::{Deserialize, Serialize};

/// Classification of a merge request, chosen from a closed list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MergeCategory {
    Feature,
    #[serde(rename = "Bug-fix")]
    BugFix,
    Refactor,
    Performance,
    #[serde(rename = "Security-patch")]
    SecurityPatch,
    #[serde(rename = "Docs / comments")]
    Docs,
    #[serde(rename = "Chore / dependency bump")]
    Chore,
}

impl MergeCategory {
    pub const ALL: [MergeCategory; 7] = [
        MergeCategory::Feature,
        MergeCategory::BugFix,
        MergeCategory::Refactor,
        MergeCategory::Performance,
        MergeCategory::SecurityPatch,
        MergeCategory::Docs,
        MergeCategory::Chore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MergeCategory::Feature => "Feature",
            MergeCategory::BugFix => "Bug-fix",
            MergeCategory::Refactor => "Refactor",
            MergeCategory::Performance => "Performance",
            MergeCategory::SecurityPatch => "Security-patch",
            MergeCategory::Docs => "Docs / comments",
            MergeCategory::Chore => "Chore / dependency bump",
        }
    }
}

impl std::fmt::Display for MergeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity of a reported issue. Ordering is LOW < MEDIUM < HIGH < CRITICAL,
/// so the report can sort descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Effort estimate for a merge request, ordered Trivial < ... < Major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Effort {
    Trivial,
    Minor,
    Moderate,
    Large,
    Major,
}

impl Effort {
    pub const ALL: [Effort; 5] = [
        Effort::Trivial,
        Effort::Minor,
        Effort::Moderate,
        Effort::Large,
        Effort::Major,
    ];

    /// Numeric score 1..=5 used for the persisted plot data.
    pub fn score(&self) -> u8 {
        match self {
            Effort::Trivial => 1,
            Effort::Minor => 2,
            Effort::Moderate => 3,
            Effort::Large => 4,
            Effort::Major => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Effort::Trivial => "Trivial",
            Effort::Minor => "Minor",
            Effort::Moderate => "Moderate",
            Effort::Large => "Large",
            Effort::Major => "Major",
        }
    }
}

impl std::fmt::Display for Effort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One issue the reviewer found in a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PotentialIssue {
    pub file_path: String,
    /// Line reference as reported by the model; free-form ("42", "10-14").
    #[serde(default)]
    pub line: String,
    pub issue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_solution: Option<String>,
    pub level: Severity,
}

/// The structured analysis result for one merge commit.
///
/// `commit_hash` is always stamped by the protocol after parsing; the
/// model's own value (if any) is not trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    #[serde(default)]
    pub hidden_reasoning: String,
    #[serde(rename = "type")]
    pub category: MergeCategory,
    #[serde(default)]
    pub issues: Vec<PotentialIssue>,
    pub effort_estimate: Effort,
    #[serde(default)]
    pub commit_hash: String,
}

impl Verdict {
    /// Safe default returned when the protocol exhausts its round budget
    /// without a usable structured answer. Moderate sits in the middle of
    /// the effort scale so degraded commits don't skew the charts.
    pub fn degraded(commit_hash: &str) -> Self {
        Verdict {
            hidden_reasoning: String::new(),
            category: MergeCategory::Chore,
            issues: Vec::new(),
            effort_estimate: Effort::Moderate,
            commit_hash: commit_hash.to_string(),
        }
    }
}

/// Per-commit plot point in the persisted author document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitPoint {
    pub hash: String,
    /// Effort score 1..=5.
    pub effort: u8,
    /// Number of issues in the verdict.
    pub issues: usize,
}

/// Everything persisted for one author: one JSON document, overwritten on
/// re-run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorAggregate {
    pub author: String,
    pub commits: Vec<CommitPoint>,
    pub analyses: Vec<Verdict>,
}

impl AuthorAggregate {
    pub fn from_verdicts(author: &str, verdicts: Vec<Verdict>) -> Self {
        let commits = verdicts
            .iter()
            .map(|v| CommitPoint {
                hash: short_hash(&v.commit_hash).to_string(),
                effort: v.effort_estimate.score(),
                issues: v.issues.len(),
            })
            .collect();
        AuthorAggregate {
            author: author.to_string(),
            commits,
            analyses: verdicts,
        }
    }
}

/// Abbreviated commit hash for display and plot data.
pub fn short_hash(hash: &str) -> &str {
    if hash.len() > 7 {
        &hash[..7]
    } else {
        hash
    }
}

/// JSON Schema for the verdict, sent as the structured-output contract.
pub fn verdict_schema() -> serde_json::Value {
    let categories: Vec<&str> = MergeCategory::ALL.iter().map(|c| c.as_str()).collect();
    let severities = ["LOW", "MEDIUM", "HIGH", "CRITICAL"];
    let efforts: Vec<&str> = Effort::ALL.iter().map(|e| e.as_str()).collect();

    // Strict structured output requires every property key to appear in
    // `required`; optional fields are expressed as nullable instead.
    serde_json::json!({
        "type": "object",
        "required": ["hiddenReasoning", "type", "issues", "effortEstimate", "commitHash"],
        "additionalProperties": false,
        "properties": {
            "hiddenReasoning": {
                "type": "string",
                "description": "Private reasoning behind the classification"
            },
            "type": { "type": "string", "enum": categories },
            "issues": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["filePath", "line", "issue", "proposedSolution", "level"],
                    "additionalProperties": false,
                    "properties": {
                        "filePath": { "type": "string" },
                        "line": { "type": "string" },
                        "issue": { "type": "string" },
                        "proposedSolution": { "type": ["string", "null"] },
                        "level": { "type": "string", "enum": severities }
                    }
                }
            },
            "effortEstimate": { "type": "string", "enum": efforts },
            "commitHash": { "type": "string" }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_wire_strings_round_trip() {
        for category in MergeCategory::ALL {
            let encoded = serde_json::to_string(&category).unwrap();
            assert_eq!(encoded, format!("\"{}\"", category.as_str()));
            let decoded: MergeCategory = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, category);
        }
    }

    #[test]
    fn test_severity_wire_strings_and_ordering() {
        let encoded = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(encoded, "\"CRITICAL\"");
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_effort_scores_are_ordered_one_to_five() {
        let scores: Vec<u8> = Effort::ALL.iter().map(|e| e.score()).collect();
        assert_eq!(scores, vec![1, 2, 3, 4, 5]);
        assert!(Effort::Trivial < Effort::Major);
    }

    #[test]
    fn test_unknown_severity_is_rejected() {
        let raw = r#"{"filePath":"a.py","line":"1","issue":"x","level":"SEVERE"}"#;
        assert!(serde_json::from_str::<PotentialIssue>(raw).is_err());
    }

    #[test]
    fn test_verdict_parses_model_output_without_commit_hash() {
        let raw = r#"{
            "hiddenReasoning": "adds an endpoint",
            "type": "Feature",
            "issues": [
                {"filePath": "app.py", "line": "10", "issue": "no auth", "level": "HIGH"}
            ],
            "effortEstimate": "Minor"
        }"#;
        let verdict: Verdict = serde_json::from_str(raw).unwrap();
        assert_eq!(verdict.category, MergeCategory::Feature);
        assert_eq!(verdict.effort_estimate, Effort::Minor);
        assert_eq!(verdict.issues.len(), 1);
        assert!(verdict.commit_hash.is_empty());
    }

    #[test]
    fn test_verdict_without_category_is_rejected() {
        let raw = r#"{"hiddenReasoning":"","issues":[],"effortEstimate":"Minor"}"#;
        assert!(serde_json::from_str::<Verdict>(raw).is_err());
    }

    #[test]
    fn test_degraded_verdict_shape() {
        let verdict = Verdict::degraded("abc123");
        assert_eq!(verdict.commit_hash, "abc123");
        assert!(verdict.issues.is_empty());
        assert_eq!(verdict.effort_estimate, Effort::Moderate);
        assert_eq!(verdict.category, MergeCategory::Chore);
    }

    #[test]
    fn test_aggregate_from_verdicts() {
        let mut verdict = Verdict::degraded("0123456789abcdef");
        verdict.effort_estimate = Effort::Large;
        let aggregate = AuthorAggregate::from_verdicts("alice", vec![verdict]);
        assert_eq!(aggregate.author, "alice");
        assert_eq!(aggregate.commits.len(), 1);
        assert_eq!(aggregate.commits[0].hash, "0123456");
        assert_eq!(aggregate.commits[0].effort, 4);
        assert_eq!(aggregate.commits[0].issues, 0);
    }

    #[test]
    fn test_schema_requires_every_property() {
        // Strict structured output rejects schemas where a property is
        // absent from `required` under additionalProperties: false.
        let schema = verdict_schema();
        for (node, label) in [
            (&schema, "verdict"),
            (&schema["properties"]["issues"]["items"], "issue"),
        ] {
            let properties = node["properties"].as_object().unwrap();
            let required: Vec<&str> = node["required"]
                .as_array()
                .unwrap()
                .iter()
                .map(|v| v.as_str().unwrap())
                .collect();
            for key in properties.keys() {
                assert!(required.contains(&key.as_str()), "{label} missing {key}");
            }
        }
    }

    #[test]
    fn test_verdict_parses_null_proposed_solution() {
        let raw = r#"{
            "hiddenReasoning": "",
            "type": "Bug-fix",
            "issues": [
                {"filePath": "a.py", "line": "4", "issue": "off by one",
                 "proposedSolution": null, "level": "LOW"}
            ],
            "effortEstimate": "Trivial",
            "commitHash": "deadbeef"
        }"#;
        let verdict: Verdict = serde_json::from_str(raw).unwrap();
        assert!(verdict.issues[0].proposed_solution.is_none());
        assert_eq!(verdict.commit_hash, "deadbeef");
    }

    #[test]
    fn test_schema_lists_all_enums() {
        let schema = verdict_schema();
        let categories = schema["properties"]["type"]["enum"].as_array().unwrap();
        assert_eq!(categories.len(), 7);
        let efforts = schema["properties"]["effortEstimate"]["enum"]
            .as_array()
            .unwrap();
        assert_eq!(efforts.len(), 5);
    }
}
