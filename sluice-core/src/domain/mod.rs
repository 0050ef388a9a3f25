//! Core domain types
//!
//! This module contains the core domain structures used across Sluice crates.
//! These types are shared between the engine (which drives and persists them)
//! and stage plugins (which read and produce them).

pub mod artifact;
pub mod content;
pub mod pipeline;
pub mod run;
pub mod work_item;
