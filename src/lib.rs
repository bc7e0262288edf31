pub mod config;
pub mod executor;
pub mod flow;
pub mod logger;
pub mod schema;
pub mod server;
pub mod storage;
pub mod variables;
pub mod watcher;
