#![forbid(unsafe_code)]

pub mod aggregate;
pub mod config;
pub mod extract;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod server;
pub mod store;
pub mod summarize;
