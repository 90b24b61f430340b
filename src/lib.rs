pub mod backup;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod inventory;
pub mod orchestrator;
pub mod policy;
pub mod resolver;
pub mod runtime;
pub mod source;
pub mod version;
