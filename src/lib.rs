pub mod config;
pub mod context;
pub mod db;
pub mod directory;
pub mod feed;
pub mod geo;
pub mod memory;
pub mod models;
pub mod publisher;
pub mod session;
pub mod watcher;
