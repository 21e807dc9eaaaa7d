pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod mcp;
pub mod models;
pub mod runner;
pub mod scheduler;
