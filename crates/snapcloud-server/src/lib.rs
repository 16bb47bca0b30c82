//! Snap!Cloud Server - project store API
//!
//! This crate provides the catalog, lifecycle, lineage and derived-artifact
//! layers of the project store, and the REST API that exposes them.

pub mod blobs;
pub mod catalog;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod derived;
pub mod error;
pub mod lifecycle;
pub mod lineage;
pub mod models;
pub mod routes;
pub mod state;

pub use error::AppError;
pub use routes::create_router;
pub use state::AppState;
