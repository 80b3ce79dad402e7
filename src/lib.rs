pub mod app;
pub mod cli;
pub mod config;
pub mod errors;
pub mod imap;
pub mod message;
pub mod pdf;
pub mod storage;
pub mod sync;
pub mod types;
