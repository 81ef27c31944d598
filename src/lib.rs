// ABOUTME: Library root for herd - the concurrent SSH run engine and its inventory.
// ABOUTME: The main binary is in main.rs.

pub mod config;
pub mod engine;
pub mod error;
pub mod output;
pub mod ssh;
pub mod transport;
pub mod types;
