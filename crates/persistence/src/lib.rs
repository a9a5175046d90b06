//! Persistence layer for the bulk export backend.
//!
//! This crate contains:
//! - Database connection management and migrations
//! - Entity definitions (database row mappings)
//! - PostgreSQL implementations of the queue, record store and data source

pub mod db;
pub mod entities;
pub mod metrics;
pub mod repositories;
