pub mod analysis;
pub mod app;
pub mod cli;
pub mod config;
pub mod history;
pub mod inference;
pub mod logging;
pub mod server;
