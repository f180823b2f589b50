//! Drives the bounded review conversation for a single merge commit.
//!
//! Two passes share the same loop: the reviewer pass produces a verdict
//! from the diff, and the defender pass re-examines it when the reviewer
//! classified the merge as a Feature. Each pass gets a fresh round budget.
//! A pass that exhausts its budget without a parseable verdict degrades to
//! a neutral default instead of failing the whole analysis.

use crate::llm::client::{
    parse_structured_content, ChatBackend, ChatOutcome, ChatRequest, Message, ResponseFormat,
    ToolChoice,
};
use crate::llm::prompts;
use crate::llm::tools::{self, ToolCall, ToolDefinition};
use devscope_adapters::repo::RepoReader;
use devscope_core::{
    tool_access_for_round, verdict_schema, MergeCategory, ModelTurn, ProtocolState, ToolAccess,
    Verdict,
};
use std::path::Path;
use std::time::Duration;

const VERDICT_SCHEMA_NAME: &str = "merge_request_analysis";

/// One commit prepared for analysis.
#[derive(Debug, Clone)]
pub struct CommitInput {
    pub hash: String,
    pub diff: String,
    pub score: f64,
}

/// Everything one pass needs besides its starting messages.
///
/// Holds the repository path rather than an open handle: git2 handles are
/// not `Sync`, and the pass future must stay `Send` for `tokio::spawn`.
/// Tool resolution opens a short-lived reader instead.
pub struct PassContext<'a> {
    pub backend: &'a dyn ChatBackend,
    pub repo_path: &'a Path,
    pub model: &'a str,
    pub commit_hash: &'a str,
    pub tree_paths: &'a [String],
    pub max_rounds: usize,
    pub round_timeout: Duration,
}

impl PassContext<'_> {
    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        vec![tools::file_contents_tool(self.tree_paths)]
    }

    /// Run the loop until a verdict parses or the budget runs out.
    /// `None` means degraded.
    async fn run(&self, mut messages: Vec<Message>) -> Option<Verdict> {
        let tool_definitions = self.tool_definitions();
        let mut state = ProtocolState::start();
        let mut pending_calls: Vec<ToolCall> = Vec::new();
        let mut parsed: Option<Verdict> = None;

        while !state.is_terminal() {
            match state {
                ProtocolState::AwaitingModel { round } => {
                    let access = tool_access_for_round(round, self.max_rounds);
                    let request = ChatRequest {
                        model: self.model.to_string(),
                        messages: messages.clone(),
                        tools: Some(tool_definitions.clone()),
                        tool_choice: Some(match access {
                            ToolAccess::Auto => ToolChoice::Auto,
                            ToolAccess::Forbidden => ToolChoice::None,
                        }),
                        response_format: Some(ResponseFormat::json_schema(
                            VERDICT_SCHEMA_NAME,
                            verdict_schema(),
                        )),
                    };

                    let turn = match tokio::time::timeout(
                        self.round_timeout,
                        self.backend.complete(request),
                    )
                    .await
                    {
                        Err(_) => {
                            tracing::warn!(
                                commit = self.commit_hash,
                                round,
                                "model round timed out"
                            );
                            ModelTurn::Unusable
                        }
                        Ok(Err(err)) => {
                            tracing::warn!(
                                commit = self.commit_hash,
                                round,
                                error = %err,
                                "model round failed"
                            );
                            ModelTurn::Unusable
                        }
                        Ok(Ok(ChatOutcome::ToolCalls(calls))) => {
                            pending_calls = calls;
                            ModelTurn::ToolRequest
                        }
                        Ok(Ok(ChatOutcome::Message { content })) => {
                            match parse_structured_content::<Verdict>(&content) {
                                Ok(verdict) => {
                                    parsed = Some(verdict);
                                    ModelTurn::FinalAnswer
                                }
                                Err(err) => {
                                    tracing::warn!(
                                        commit = self.commit_hash,
                                        round,
                                        error = %err,
                                        "model reply did not parse as a verdict"
                                    );
                                    ModelTurn::Unusable
                                }
                            }
                        }
                    };
                    state = state.on_model_turn(turn, self.max_rounds);
                }
                ProtocolState::AwaitingToolResult { .. } => {
                    let calls = std::mem::take(&mut pending_calls);
                    messages.push(Message::assistant_tool_calls(calls.clone()));
                    for call in calls {
                        let content = self.resolve_tool_call(&call);
                        messages.push(Message::tool(call.id, content));
                    }
                    state = state.on_tool_resolved();
                }
                ProtocolState::Done | ProtocolState::Degraded => {}
            }
        }

        match state {
            ProtocolState::Done => parsed,
            _ => None,
        }
    }

    /// Fetch the requested files, dropping paths that don't exist in the
    /// commit. Malformed requests become error text for the model instead
    /// of failing the pass.
    fn resolve_tool_call(&self, call: &ToolCall) -> String {
        let args = match tools::parse_fetch_args(call) {
            Ok(args) => args,
            Err(err) => return format!("Error: {err}"),
        };
        let known = tools::filter_known_paths(&args.files, self.tree_paths);
        if known.is_empty() {
            return "Error: none of the requested paths exist in this commit".to_string();
        }
        let reader = match RepoReader::open(self.repo_path) {
            Ok(reader) => reader,
            Err(err) => return format!("Error: {err}"),
        };
        match reader.file_contents(self.commit_hash, &known) {
            Ok(content) => content,
            Err(err) => format!("Error: {err}"),
        }
    }
}

/// Analyze one merge commit: reviewer pass, then a defender pass when the
/// reviewer called it a Feature. Always yields a verdict stamped with the
/// commit hash.
pub async fn analyze_commit(context: &PassContext<'_>, commit: &CommitInput) -> Verdict {
    let messages = vec![
        Message::system(prompts::REVIEWER_SYSTEM_PROMPT),
        Message::user(prompts::reviewer_user_prompt(&commit.diff, commit.score)),
    ];

    let mut verdict = match context.run(messages).await {
        Some(mut verdict) => {
            verdict.commit_hash = commit.hash.clone();
            verdict
        }
        None => {
            tracing::warn!(commit = %commit.hash, "analysis degraded to default verdict");
            return Verdict::degraded(&commit.hash);
        }
    };

    if verdict.category == MergeCategory::Feature {
        verdict = defend_verdict(context, commit, verdict).await;
    }

    verdict
}

/// Second-opinion pass. When the defender itself degrades, the reviewer's
/// verdict stands.
async fn defend_verdict(
    context: &PassContext<'_>,
    commit: &CommitInput,
    verdict: Verdict,
) -> Verdict {
    let verdict_json = match serde_json::to_string_pretty(&verdict) {
        Ok(json) => json,
        Err(_) => return verdict,
    };
    let messages = vec![
        Message::system(prompts::DEFENDER_SYSTEM_PROMPT),
        Message::user(prompts::defender_user_prompt(&verdict_json)),
    ];

    match context.run(messages).await {
        Some(mut defended) => {
            defended.commit_hash = commit.hash.clone();
            defended
        }
        None => {
            tracing::warn!(commit = %commit.hash, "defender pass degraded; keeping first verdict");
            verdict
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::ChatOutcome;
    use crate::llm::tools::{FunctionCall, ToolCall};
    use async_trait::async_trait;
    use devscope_core::{Effort, DEFAULT_MAX_ROUNDS};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub(crate) fn verdict_json(category: &str, effort: &str) -> String {
        format!(
            r#"{{"hiddenReasoning":"r","type":"{category}","issues":[],"effortEstimate":"{effort}"}}"#
        )
    }

    /// Backend that replays a fixed script of outcomes and records the
    /// requests it saw.
    pub(crate) struct ScriptedBackend {
        script: Mutex<Vec<anyhow::Result<ChatOutcome>>>,
        pub calls: AtomicUsize,
        pub requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedBackend {
        pub fn new(script: Vec<anyhow::Result<ChatOutcome>>) -> Self {
            let mut script = script;
            script.reverse();
            ScriptedBackend {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn message(content: impl Into<String>) -> anyhow::Result<ChatOutcome> {
            Ok(ChatOutcome::Message {
                content: content.into(),
            })
        }

        pub fn tool_request(files: &[&str]) -> anyhow::Result<ChatOutcome> {
            let arguments = serde_json::json!({ "files": files }).to_string();
            Ok(ChatOutcome::ToolCalls(vec![ToolCall {
                id: "call_1".to_string(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: tools::FILE_CONTENTS_TOOL.to_string(),
                    arguments,
                },
            }]))
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn complete(&self, request: ChatRequest) -> anyhow::Result<ChatOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(anyhow::anyhow!("script exhausted")))
        }
    }

    fn scratch_merge_repo(dir: &std::path::Path) -> String {
        use git2::Repository;
        let repo = Repository::init(dir).unwrap();
        let sig = git2::Signature::now("Test Author", "alice@example.com").unwrap();
        let workdir = repo.workdir().unwrap();

        let commit = |files: &[(&str, &str)], message: &str, parents: &[&git2::Commit<'_>]| {
            for (path, content) in files {
                std::fs::write(workdir.join(path), content).unwrap();
            }
            let mut index = repo.index().unwrap();
            index
                .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
                .unwrap();
            index.write().unwrap();
            let tree_id = index.write_tree().unwrap();
            let tree = repo.find_tree(tree_id).unwrap();
            let oid = repo
                .commit(None, &sig, &sig, message, &tree, parents)
                .unwrap();
            repo.set_head_detached(oid).unwrap();
            oid
        };

        let base = commit(&[("app.py", "def run():\n    return 1\n")], "initial", &[]);
        let base_commit = repo.find_commit(base).unwrap();
        let feature = commit(
            &[("feature.py", "def helper(x):\n    return x * 2\n")],
            "add helper",
            &[&base_commit],
        );
        let feature_commit = repo.find_commit(feature).unwrap();
        let merge = commit(
            &[],
            "Merge branch 'feature'",
            &[&base_commit, &feature_commit],
        );
        let merge_commit = repo.find_commit(merge).unwrap();
        repo.branch("main", &merge_commit, true).unwrap();
        repo.set_head("refs/heads/main").unwrap();
        merge.to_string()
    }

    fn commit_input(hash: &str) -> CommitInput {
        CommitInput {
            hash: hash.to_string(),
            diff: "Merge branch 'feature'\n\n==== File: feature.py ====\n+def helper(x):\n"
                .to_string(),
            score: 12.5,
        }
    }

    fn context<'a>(
        backend: &'a ScriptedBackend,
        repo_path: &'a Path,
        hash: &'a str,
        tree_paths: &'a [String],
    ) -> PassContext<'a> {
        PassContext {
            backend,
            repo_path,
            model: "gpt-4o",
            commit_hash: hash,
            tree_paths,
            max_rounds: DEFAULT_MAX_ROUNDS,
            round_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_verdict_is_stamped_with_commit_hash() {
        let dir = tempfile::tempdir().unwrap();
        let hash = scratch_merge_repo(dir.path());
        let reader = RepoReader::open(dir.path()).unwrap();
        let paths = reader.tree_paths(&hash).unwrap();

        let backend =
            ScriptedBackend::new(vec![ScriptedBackend::message(verdict_json("Refactor", "Minor"))]);
        let ctx = context(&backend, dir.path(), &hash, &paths);

        let verdict = analyze_commit(&ctx, &commit_input(&hash)).await;
        assert_eq!(verdict.commit_hash, hash);
        assert_eq!(verdict.category, MergeCategory::Refactor);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tool_round_fetches_files_then_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let hash = scratch_merge_repo(dir.path());
        let reader = RepoReader::open(dir.path()).unwrap();
        let paths = reader.tree_paths(&hash).unwrap();

        let backend = ScriptedBackend::new(vec![
            ScriptedBackend::tool_request(&["feature.py", "ghost.py"]),
            ScriptedBackend::message(verdict_json("Bug-fix", "Trivial")),
        ]);
        let ctx = context(&backend, dir.path(), &hash, &paths);

        let verdict = analyze_commit(&ctx, &commit_input(&hash)).await;
        assert_eq!(verdict.category, MergeCategory::BugFix);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);

        // The second request carries the tool exchange; hallucinated paths
        // were dropped, existing ones were served.
        let requests = backend.requests.lock().unwrap();
        let tool_message = requests[1]
            .messages
            .iter()
            .find(|m| m.role == "tool")
            .unwrap();
        let content = tool_message.content.as_deref().unwrap();
        assert!(content.contains("### FILE: `feature.py`"));
        assert!(!content.contains("ghost.py"));
    }

    #[tokio::test]
    async fn test_tool_forbidden_on_final_round() {
        let dir = tempfile::tempdir().unwrap();
        let hash = scratch_merge_repo(dir.path());
        let reader = RepoReader::open(dir.path()).unwrap();
        let paths = reader.tree_paths(&hash).unwrap();

        let backend = ScriptedBackend::new(vec![
            ScriptedBackend::tool_request(&["feature.py"]),
            ScriptedBackend::tool_request(&["app.py"]),
            ScriptedBackend::message(verdict_json("Chore / dependency bump", "Trivial")),
        ]);
        let ctx = context(&backend, dir.path(), &hash, &paths);

        let verdict = analyze_commit(&ctx, &commit_input(&hash)).await;
        assert_eq!(verdict.category, MergeCategory::Chore);

        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].tool_choice, Some(ToolChoice::Auto));
        assert_eq!(requests[1].tool_choice, Some(ToolChoice::Auto));
        assert_eq!(requests[2].tool_choice, Some(ToolChoice::None));
    }

    #[tokio::test]
    async fn test_garbage_replies_degrade_after_round_budget() {
        let dir = tempfile::tempdir().unwrap();
        let hash = scratch_merge_repo(dir.path());
        let reader = RepoReader::open(dir.path()).unwrap();
        let paths = reader.tree_paths(&hash).unwrap();

        let backend = ScriptedBackend::new(vec![
            ScriptedBackend::message("not json"),
            ScriptedBackend::message("still not json"),
            ScriptedBackend::message("nope"),
        ]);
        let ctx = context(&backend, dir.path(), &hash, &paths);

        let verdict = analyze_commit(&ctx, &commit_input(&hash)).await;
        assert_eq!(verdict, Verdict::degraded(&hash));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_feature_verdict_triggers_defender_pass() {
        let dir = tempfile::tempdir().unwrap();
        let hash = scratch_merge_repo(dir.path());
        let reader = RepoReader::open(dir.path()).unwrap();
        let paths = reader.tree_paths(&hash).unwrap();

        let backend = ScriptedBackend::new(vec![
            ScriptedBackend::message(verdict_json("Feature", "Major")),
            ScriptedBackend::message(verdict_json("Feature", "Moderate")),
        ]);
        let ctx = context(&backend, dir.path(), &hash, &paths);

        let verdict = analyze_commit(&ctx, &commit_input(&hash)).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        // Defender's re-estimate wins.
        assert_eq!(verdict.effort_estimate, Effort::Moderate);
        assert_eq!(verdict.commit_hash, hash);

        // Defender pass starts from its own system prompt with the first
        // verdict as the user message.
        let requests = backend.requests.lock().unwrap();
        let defender_user = requests[1].messages[1].content.as_deref().unwrap();
        assert!(defender_user.contains("\"Feature\""));
    }

    #[tokio::test]
    async fn test_non_feature_verdict_skips_defender() {
        let dir = tempfile::tempdir().unwrap();
        let hash = scratch_merge_repo(dir.path());
        let reader = RepoReader::open(dir.path()).unwrap();
        let paths = reader.tree_paths(&hash).unwrap();

        let backend =
            ScriptedBackend::new(vec![ScriptedBackend::message(verdict_json("Bug-fix", "Minor"))]);
        let ctx = context(&backend, dir.path(), &hash, &paths);

        let verdict = analyze_commit(&ctx, &commit_input(&hash)).await;
        assert_eq!(verdict.category, MergeCategory::BugFix);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_defender_keeps_first_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let hash = scratch_merge_repo(dir.path());
        let reader = RepoReader::open(dir.path()).unwrap();
        let paths = reader.tree_paths(&hash).unwrap();

        let backend = ScriptedBackend::new(vec![
            ScriptedBackend::message(verdict_json("Feature", "Major")),
            ScriptedBackend::message("garbage"),
            ScriptedBackend::message("garbage"),
            ScriptedBackend::message("garbage"),
        ]);
        let ctx = context(&backend, dir.path(), &hash, &paths);

        let verdict = analyze_commit(&ctx, &commit_input(&hash)).await;
        assert_eq!(verdict.category, MergeCategory::Feature);
        assert_eq!(verdict.effort_estimate, Effort::Major);
        assert_eq!(verdict.commit_hash, hash);
    }
}
