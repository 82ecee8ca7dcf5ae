//! Resilient progressive loading of a unified local + remote media catalog.
//!
//! [`app::CatalogApp`] wires the pieces together: the service status
//! registry and its background monitor, the error recovery engine, and the
//! progressive loader that drives the phase state machine and the merge
//! engine.

pub mod app;
pub mod backends;
pub mod config;
pub mod events;
pub mod models;
pub mod services;
pub mod utils;

pub use app::CatalogApp;
pub use config::Config;
pub use utils::{CatalogError, CatalogResult};
