//! # TaskTrail Shared Library
//!
//! This crate contains the domain types, persistence, queue plumbing and
//! business services used by the TaskTrail API server and audit worker.
//!
//! ## Module Organization
//!
//! - `models`: Database models and data structures
//! - `repository`: Repository traits with Postgres and in-memory backends
//! - `service`: Task, user and auth services
//! - `audit`: Audit message format and the bounded dispatcher
//! - `queue`: Queue traits and the in-memory queue
//! - `redis`: Redis client and the Redis Streams audit queue
//! - `auth`: JWT, password hashing and axum middleware
//! - `db`: Connection pool and migrations
//! - `shutdown`: SIGINT/SIGTERM handling for the binaries
//! - `error`: Service error type

pub mod audit;
pub mod auth;
pub mod db;
pub mod error;
pub mod models;
pub mod queue;
pub mod redis;
pub mod repository;
pub mod service;
pub mod shutdown;

/// Current version of the TaskTrail shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
