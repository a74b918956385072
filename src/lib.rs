//! Beacon notification bridge library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod config;
pub mod consumer;
pub mod dispatch;
pub mod queue;
pub mod routes;
pub mod state;
pub mod ws;
