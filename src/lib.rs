pub mod agent;
pub mod completion;
pub mod config;
pub mod error;
pub mod history;
pub mod llm;
pub mod logging;
pub mod security;
pub mod session;
pub mod shell;
