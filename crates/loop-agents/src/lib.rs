//! Runtime adapters for the `resolution` engine: demo API client, LLM
//! oracles, completion cache and configuration.

pub mod cache;
pub mod centrala;
pub mod config;
pub mod llm;
pub mod prompts;

pub use cache::CachedCompletion;
pub use centrala::CentralaClient;
pub use config::LoopConfig;
pub use llm::{Completion, LlmOracle, ModelRole, RigCompletion};
