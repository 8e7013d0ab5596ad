//! Multi-backend object storage gateway.
//!
//! Files are uploaded once to a primary barrel, replicated asynchronously to
//! the remaining barrels through an in-process queue and served back over
//! HTTP by slug.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod queue;
pub mod repository;
pub mod routes;
pub mod services;
pub mod session;
pub mod slug;
pub mod state;
pub mod storage;
pub mod validation;
