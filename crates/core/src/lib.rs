//! Core domain for the fleet dashboard backend: advisory locks, OAuth token
//! lifecycle, and the periodic engines that reconcile remote device and task
//! state into local storage.
//!
//! Everything here is storage- and transport-agnostic. The Postgres layer and
//! the HTTP clients plug in through the traits defined by each module, which
//! is also what keeps the engine logic testable against in-memory fakes.

pub mod auth;
pub mod devices;
pub mod errors;
pub mod locks;
pub mod radius;
pub mod settings;
pub mod sync;

pub use errors::{Error, Result};
