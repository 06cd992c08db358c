//! Common library shared by the services
//!
//! This crate provides shared infrastructure used across services: PostgreSQL
//! connectivity, the Redis cache pool, and database error types.

pub mod cache;
pub mod database;
pub mod error;
