//! End-to-end tests for the decoy server.

#[path = "../common/mod.rs"]
mod common;

mod auth;
mod connection;
