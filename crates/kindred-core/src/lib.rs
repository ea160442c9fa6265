//! Core types and trait definitions for the Kindred master patient index.
//!
//! This crate is deliberately free of database and process dependencies.
//! All other crates depend on it; it depends on nothing proprietary.

pub mod audit;
pub mod cluster;
pub mod config;
pub mod error;
pub mod group;
pub mod ids;
pub mod job;
pub mod person;
pub mod record;
pub mod store;
pub mod user;

pub use error::{Error, Result};
