pub mod llm;

pub use llm::{CompletionOptions, LLMProvider, Message, MockLLMProvider, OpenAIProvider};
