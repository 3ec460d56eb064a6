//! AUTOTRADER — signal-to-trade pipeline for a binary-options broker.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod feed;
pub mod broker;
pub mod strategy;
pub mod engine;
pub mod dashboard;
