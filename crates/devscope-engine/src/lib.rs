//! Analysis engine: the bounded review protocol and the per-author
//! orchestrator that fans commits out to the model.

pub mod llm;
pub mod orchestrator;
pub mod protocol;

pub use llm::client::{ChatBackend, ChatOutcome, HttpBackend};
pub use orchestrator::{analyze_author, AnalyzeOptions};
