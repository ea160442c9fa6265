//! The Kindred matching pipeline.
//!
//! Two halves, split across a process boundary:
//!
//! - [`service::MatchingService`] runs in the worker's control loop. It
//!   claims the next job and delegates execution to [`runner::JobRunner`],
//!   which isolates the heavy matching work in a child process. The control
//!   loop converts every failure into a failed job and carries on.
//! - [`matcher::Matcher`] runs inside that child. It imports records, invokes
//!   the external linkage engine, and applies the scored pairs to the person
//!   graph. It never touches job status; the parent owns that.

pub mod csv;
pub mod engine;
pub mod matcher;
pub mod runner;
pub mod service;

pub mod error;

pub use error::{Error, Result};
