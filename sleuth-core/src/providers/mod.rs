//! Concrete language model providers.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatibleProvider;
