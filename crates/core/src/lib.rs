pub mod bridge;
pub mod command;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod focus;
pub mod guard;
pub mod interpreter;
pub mod locator;
pub mod logger;
pub mod matcher;
pub mod orchestrator;
pub mod platform;
pub mod queue;
pub mod settings;
pub mod shell;
pub mod sleep;
pub mod storage;
pub mod transcript;
pub mod types;
