//! Shared types for media-sync: manifest models, naming, retry timing,
//! configuration and errors.
pub mod config;
pub mod errors;
pub mod models;
pub mod naming;
pub mod retry;
