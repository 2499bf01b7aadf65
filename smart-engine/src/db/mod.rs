//! Engine-side database access
//!
//! Schema creation lives in `smart_common::db`; these modules hold the
//! queries. Functions taking `&mut SqliteConnection` run inside the caller's
//! transaction, functions taking `&SqlitePool` manage their own.

pub mod batches;
pub mod data;
pub mod projects;
pub mod queues;
