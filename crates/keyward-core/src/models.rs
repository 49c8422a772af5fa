//! Domain models for Keyward.
//!
//! These are the core types shared across all crates. State changes go
//! through named methods so every mutation stamps who and when.

pub mod audit;
pub mod binding;
pub mod permission;
pub mod role;
