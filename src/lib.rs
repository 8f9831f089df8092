//! Search job service
//!
//! Accepts long-running image search requests, runs them in the background
//! through an external pipeline, and exposes their status and results for
//! polling. Job state lives in two tiers: a short-lived ephemeral store for
//! fast status reads and a durable store that backs result links and retries.

pub mod app_state;
pub mod client;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
