pub mod config;
pub mod dap;
pub mod debugger;
pub mod display;
pub mod engine;
pub mod executor;
pub mod host;
pub mod parser;
