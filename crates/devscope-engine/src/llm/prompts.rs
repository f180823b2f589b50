//! System and user prompts for the two review passes.

/// First pass: classify the merge and report issues.
pub const REVIEWER_SYSTEM_PROMPT: &str = "\
You are a secure-code reviewer.

You will receive:
- The raw git diff of a merge commit
- The Halstead total volume for the changed source files (objective metric)

Your tasks:
1. Classify the merge request type, choosing exactly one from the predefined list.
2. Identify potential issues (security, logic, maintainability, best practices), \
each with a severity level: LOW, MEDIUM, HIGH, or CRITICAL.
3. If the git diff is insufficient for full understanding, call get_file_contents \
with the exact file paths you need.
4. Return the result strictly as JSON matching the required schema.
5. For each identified issue, propose a specific and technically actionable \
improvement: rewrite the affected lines with corrected code, or describe precise \
refactoring steps.

Do not make assumptions without proper file context. You may call \
get_file_contents as many times as needed, but aim to retrieve all relevant \
files in a single call when possible.";

/// Second pass: a skeptical defender re-examines a Feature verdict.
pub const DEFENDER_SYSTEM_PROMPT: &str = "\
You are a senior secure-code defender reviewing an existing analysis.

1. Retrieve the files associated with reported issues by calling \
get_file_contents, even if the initial report seems valid.
2. Then copy the existing analysis, but:
- Keep only issues with severity HIGH or CRITICAL.
- Reevaluate and remove or adjust any overstated concerns.
- Optionally suggest a better fix or explain why a previously reported issue \
is invalid or non-critical.

Output the result strictly as a JSON object matching the required schema.";

/// User message for the first pass: the objective score line followed by the
/// full merge diff.
pub fn reviewer_user_prompt(diff: &str, score: f64) -> String {
    format!("HALSTEAD_TOTAL_VOLUME: {score}\n\n{diff}")
}

/// User message for the defender pass: the first verdict as JSON.
pub fn defender_user_prompt(verdict_json: &str) -> String {
    verdict_json.to_string()
}
