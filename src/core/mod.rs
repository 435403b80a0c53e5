pub mod calc;
pub mod catalog;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod store;
pub mod terminal;
pub mod timerange;
