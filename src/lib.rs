//! Bounded-concurrency batch runner with durable per-stage progress tracking.
//!
//! `processor` runs work over items with retries and cancellation, `tracker`
//! persists what happened to each item per stage, and `workflow` wires both
//! to the CLI.
pub mod cache;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod exit_code;
pub mod item;
pub mod processor;
pub mod retry;
pub mod summary;
pub mod tracker;
pub mod work;
pub mod workflow;
