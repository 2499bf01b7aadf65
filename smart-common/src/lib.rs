//! # SMART Common Library
//!
//! Shared code for the SMART active-learning engine:
//! - Database initialization, schema and row models
//! - Pipeline event types (PipelineEvent) and the EventBus
//! - Configuration loading and root folder resolution
//! - Common error type

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
