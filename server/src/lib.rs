//! Vanish ephemeral file sharing server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod blobs;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod leases;
pub mod lifecycle;
pub mod routes;
pub mod share;
pub mod state;
pub mod token;
