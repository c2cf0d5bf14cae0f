pub mod a2a;
pub mod agent;
pub mod api;
pub mod battle;
pub mod config;
pub mod executor;
pub mod providers;
pub mod reporting;
pub mod supervisor;
pub mod tools;
pub mod types;

pub use config::Config;
pub use types::*;
