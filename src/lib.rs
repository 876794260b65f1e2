//! Library exports for modsync, shared between the binary and tests.

pub mod auth;
pub mod cli;
pub mod config;
pub mod environment;
pub mod error;
pub mod models;
pub mod providers;
pub mod startup;
pub mod state;
pub mod store;
pub mod sync;
pub mod utils;
