pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod locks;
pub mod memory;
pub mod models;
pub mod notify;
pub mod quotes;
pub mod trading;
pub mod trigger;
