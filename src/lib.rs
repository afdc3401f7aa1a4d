pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod observability;
pub mod pipeline;
pub mod table;

// Layered boundaries: use cases and ports in app, file and reporting adapters in infra
pub mod app;
pub mod infra;
