//! Concrete external adapters: HTTP-backed search and LLM ranking.
//!
//! `refenrich-core` depends only on the [`refenrich_core::SearchProvider`]
//! and [`refenrich_core::RankCompletion`] traits; these are the only two
//! implementations that make real network calls.

pub mod llm;
pub mod search;
