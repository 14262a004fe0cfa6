//! # Feedback Insights Core
//!
//! Shared, runtime-agnostic logic for Feedback Insights: the data model,
//! insight-type label validation, impact scoring and priority policies,
//! the storage traits, and vector utilities for taxonomy matching.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Everything
//! here is either a pure function or an async trait that the application
//! crate implements against a concrete backend.

pub mod embedding;
pub mod models;
pub mod scoring;
pub mod store;
