pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod pricing;
pub mod provider;
pub mod quote;
pub mod signal;
pub mod sync;
pub mod types;
