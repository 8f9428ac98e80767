//! LLM Provider implementations for sagebot.
//!
//! All providers implement the `sagebot_core::Provider` trait.

pub mod gemini;

pub use gemini::GeminiProvider;
