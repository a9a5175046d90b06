//! Domain layer for the bulk export backend.
//!
//! This crate contains:
//! - Domain models (export jobs, export records, property rows)
//! - The queue, record store and data source contracts
//! - In-memory implementations of those contracts

pub mod models;
pub mod services;
