//! Keyward Core: domain models, error types, and repository traits
//! shared by the storage and authorization crates.

pub mod error;
pub mod models;
pub mod repository;
