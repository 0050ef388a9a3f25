//! Sluice Core
//!
//! Core types and abstractions for the Sluice data pipeline engine.
//!
//! This crate contains:
//! - Domain types: Pipeline definitions, content items, runs, work items, artifacts
//! - Content hashing and dedup bookkeeping shared by stage plugins
//! - DTOs: Summaries exposed to callers of the engine

pub mod dedup;
pub mod domain;
pub mod dto;
pub mod error;
pub mod hash;

pub use dedup::{DedupCheck, DedupLedger};
pub use error::DomainError;
pub use hash::{ContentHash, ContentHasher};
