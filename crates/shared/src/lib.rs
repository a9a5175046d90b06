//! Shared utilities for the bulk export backend.
//!
//! This crate provides common functionality used across all other crates:
//! - Download token and job identifier generation
//! - Common validation logic

pub mod crypto;
pub mod validation;
