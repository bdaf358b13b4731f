// Library crate for integration tests.
// main.rs has its own mod declarations; this re-exports all modules.

pub mod config;
pub mod error;
pub mod index;
pub mod model;
pub mod routes;
pub mod server;
pub mod settings;
pub mod state;
pub mod store;
pub mod tools;
