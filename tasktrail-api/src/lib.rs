//! # TaskTrail API Server Library
//!
//! HTTP surface over the task, user and auth services.
//!
//! ## Modules
//!
//! - `app`: application state and router builder
//! - `config`: configuration from the environment
//! - `error`: error type and HTTP response mapping
//! - `middleware`: security headers
//! - `routes`: route handlers
//! - `seeder`: opt-in synthetic task and user generators

pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod seeder;
