//! Vittcott backend
//!
//! Answers two kinds of requests:
//! - Stock / fund quotes, arbitrated between a primary market-data API and a
//!   key-less fallback, normalized into one canonical shape
//! - Beginner-oriented finance questions, answered by a hosted LLM
//!
//! QUOTE FLOW:
//! REQUEST → VALIDATE → PRIMARY → (FALLBACK) → NORMALIZE → RESPOND

pub mod api;
pub mod arbiter;
pub mod assistant;
pub mod config;
pub mod error;
pub mod gemini;
pub mod models;
pub mod normalizer;
pub mod providers;

pub use error::Result;

// Re-export common types
pub use arbiter::{ArbiterPolicy, QuoteArbiter};
pub use assistant::FinanceAssistant;
pub use config::Settings;
pub use models::*;
