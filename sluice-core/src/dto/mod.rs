//! Data Transfer Objects
//!
//! Lightweight views of domain entities returned to engine callers
//! (CLI output, status queries).

pub mod run;
