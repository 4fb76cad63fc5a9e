// The single-call chat pipeline: pre-compute → prompt assembly → one
// JSON-mode LLM call → transactional persistence → async post-update.

pub mod json_parser;
pub mod orchestrator;
pub mod precompute;
pub mod prompt_builder;

pub use json_parser::{parse_llm_response, ParsedResponse};
pub use orchestrator::{ChatPipeline, ChatRequest, ChatResponse};
pub use precompute::{analyze_message, PrecomputeResult};
pub use prompt_builder::{build_system_prompt, PromptInputs};
